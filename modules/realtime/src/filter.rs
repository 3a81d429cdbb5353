//! Role-based visibility of change events.

use rollcall_db::ChangeEvent;
use rollcall_security::permission::tables;
use rollcall_security::{CallerContext, FieldEq, RoleCategory, fields};

/// Field-equality clause pushed to backends that filter server-side.
///
/// A clause is produced only when it admits exactly the rows
/// [`should_deliver`] admits on `table`: a consumer on a table keyed by a
/// single consumer column, or an unscoped owner on a table carrying a single
/// owner column. Everything else returns `None` and is gated client-side.
#[must_use]
pub fn server_filter_for(ctx: &CallerContext, table: &str) -> Option<FieldEq> {
    let field = match ctx.role().category() {
        RoleCategory::Administrative => return None,
        RoleCategory::OwnershipScoped if ctx.scope_id().is_none() => sole_owner_column(table)?,
        RoleCategory::OwnershipScoped => return None,
        RoleCategory::ConsumerScoped => consumer_column(table)?,
    };
    Some(FieldEq::new(field, ctx.caller_id()))
}

/// The one ownership column rows of `table` carry, if there is exactly one.
///
/// Sessions and enrollments carry both `instructor_id` and `created_by`.
fn sole_owner_column(table: &str) -> Option<&'static str> {
    match table {
        tables::CERTIFICATES => Some(fields::ISSUED_BY),
        _ => None,
    }
}

/// The one consumer column rows of `table` are addressed by.
fn consumer_column(table: &str) -> Option<&'static str> {
    match table {
        tables::ENROLLMENTS | tables::CERTIFICATES | tables::COURSE_ROSTERS => {
            Some(fields::STUDENT_ID)
        }
        tables::NOTIFICATIONS | tables::PROFILES => Some(fields::USER_ID),
        _ => None,
    }
}

/// Whether `ctx` may observe `event`.
///
/// Administrators see everything. Ownership-scoped callers see rows they
/// own, or rows in their configured location. Consumer callers see rows
/// addressed to them.
#[must_use]
pub fn should_deliver(event: &ChangeEvent, ctx: &CallerContext) -> bool {
    let category = ctx.role().category();
    if category == RoleCategory::Administrative {
        return true;
    }
    let Some(record) = event.record() else {
        return false;
    };
    let caller = Some(ctx.caller_id());
    match category {
        RoleCategory::OwnershipScoped => {
            fields::OWNERSHIP_FIELDS
                .iter()
                .any(|f| record.get_uuid(f) == caller)
                || ctx
                    .scope_id()
                    .is_some_and(|scope| record.get_uuid(fields::LOCATION_ID) == Some(scope))
        }
        RoleCategory::ConsumerScoped | RoleCategory::Administrative => fields::CONSUMER_FIELDS
            .iter()
            .any(|f| record.get_uuid(f) == caller),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use chrono::Utc;
    use rollcall_db::{ChangeKind, Record};
    use rollcall_security::Role;
    use uuid::Uuid;

    fn event(record: Record) -> ChangeEvent {
        ChangeEvent {
            table: tables::SESSIONS.to_owned(),
            kind: ChangeKind::Update,
            new: Some(record),
            old: None,
            committed_at: Utc::now(),
        }
    }

    #[test]
    fn administrators_see_everything() {
        let ev = event(Record::new().with_uuid(fields::INSTRUCTOR_ID, Uuid::new_v4()));
        for role in [Role::SystemAdmin, Role::Admin] {
            assert!(should_deliver(&ev, &CallerContext::new(role, Uuid::new_v4())));
        }
    }

    #[test]
    fn ownership_matches_owner_or_location() {
        let me = Uuid::new_v4();
        let loc = Uuid::new_v4();
        let ctx = CallerContext::new(Role::InstructorCertified, me).with_scope(loc);

        let mine = event(Record::new().with_uuid(fields::CREATED_BY, me));
        let at_my_location = event(
            Record::new()
                .with_uuid(fields::INSTRUCTOR_ID, Uuid::new_v4())
                .with_uuid(fields::LOCATION_ID, loc),
        );
        let elsewhere = event(
            Record::new()
                .with_uuid(fields::INSTRUCTOR_ID, Uuid::new_v4())
                .with_uuid(fields::LOCATION_ID, Uuid::new_v4()),
        );

        assert!(should_deliver(&mine, &ctx));
        assert!(should_deliver(&at_my_location, &ctx));
        assert!(!should_deliver(&elsewhere, &ctx));
    }

    #[test]
    fn consumer_sees_only_own_rows() {
        let me = Uuid::new_v4();
        let ctx = CallerContext::new(Role::InstructorTrainee, me);
        assert!(should_deliver(
            &event(Record::new().with_uuid(fields::STUDENT_ID, me)),
            &ctx
        ));
        assert!(!should_deliver(
            &event(Record::new().with_uuid(fields::INSTRUCTOR_ID, me)),
            &ctx
        ));
    }

    #[test]
    fn delete_is_judged_on_old_row() {
        let me = Uuid::new_v4();
        let ctx = CallerContext::new(Role::InstructorNew, me);
        let ev = ChangeEvent {
            table: tables::ENROLLMENTS.to_owned(),
            kind: ChangeKind::Delete,
            new: None,
            old: Some(Record::new().with_uuid(fields::STUDENT_ID, me)),
            committed_at: Utc::now(),
        };
        assert!(should_deliver(&ev, &ctx));
    }

    #[test]
    fn server_filter_per_category() {
        let me = Uuid::new_v4();
        assert_eq!(
            server_filter_for(&CallerContext::new(Role::Admin, me), tables::SESSIONS),
            None
        );
        assert_eq!(
            server_filter_for(&CallerContext::new(Role::Provider, me), tables::CERTIFICATES),
            Some(FieldEq::new(fields::ISSUED_BY, me))
        );
        assert_eq!(
            server_filter_for(
                &CallerContext::new(Role::InstructorTrainee, me),
                tables::ENROLLMENTS
            ),
            Some(FieldEq::new(fields::STUDENT_ID, me))
        );
        assert_eq!(
            server_filter_for(
                &CallerContext::new(Role::InstructorNew, me),
                tables::NOTIFICATIONS
            ),
            Some(FieldEq::new(fields::USER_ID, me))
        );
    }

    #[test]
    fn no_pushdown_when_one_column_cannot_cover_the_gate() {
        let me = Uuid::new_v4();
        let owner = CallerContext::new(Role::Provider, me);
        // instructor_id and created_by both grant ownership on sessions.
        assert_eq!(server_filter_for(&owner, tables::SESSIONS), None);
        assert_eq!(server_filter_for(&owner, tables::ENROLLMENTS), None);

        // A location scope widens visibility past any single column.
        let scoped = owner.with_scope(Uuid::new_v4());
        assert_eq!(server_filter_for(&scoped, tables::CERTIFICATES), None);

        let consumer = CallerContext::new(Role::InstructorTrainee, me);
        assert_eq!(server_filter_for(&consumer, tables::SESSIONS), None);
    }

    #[test]
    fn pushed_clause_admits_every_delivered_row() {
        let me = Uuid::new_v4();
        let ctx = CallerContext::new(Role::InstructorCertified, me);
        let clause = server_filter_for(&ctx, tables::CERTIFICATES).unwrap();
        let issued = ChangeEvent {
            table: tables::CERTIFICATES.to_owned(),
            ..event(Record::new().with_uuid(fields::ISSUED_BY, me))
        };
        assert!(should_deliver(&issued, &ctx));
        assert_eq!(
            issued.record().unwrap().get_uuid(&clause.field),
            Some(clause.value)
        );
    }
}
