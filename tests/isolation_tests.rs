//! 家庭隔离集成测试（内存成员关系，不依赖数据库）

use async_trait::async_trait;
use serde_json::json;
use sqlx::{Postgres, QueryBuilder};
use std::collections::HashMap;
use std::sync::Arc;
use tenant_guard::{
    context::SessionContext,
    repository::RowPredicate,
    services::{
        isolation_service::{IsolationError, MembershipSource, TableOperation},
        IsolationEnforcer,
    },
};
use uuid::Uuid;

mod common;
use common::{row, test_registry, user_ctx};

struct Memberships(HashMap<Uuid, Vec<Uuid>>);

#[async_trait]
impl MembershipSource for Memberships {
    async fn tenants_of(&self, principal_id: Uuid) -> Result<Vec<Uuid>, sqlx::Error> {
        Ok(self.0.get(&principal_id).cloned().unwrap_or_default())
    }
}

struct TwoFamilies {
    enforcer: IsolationEnforcer,
    user_a: Uuid,
    user_b: Uuid,
    f1: Uuid,
    f2: Uuid,
}

/// 用户 A 属于家庭 F1，用户 B 属于家庭 F2
fn two_families() -> TwoFamilies {
    let (user_a, user_b) = (Uuid::new_v4(), Uuid::new_v4());
    let (f1, f2) = (Uuid::new_v4(), Uuid::new_v4());
    let memberships = Memberships(HashMap::from([(user_a, vec![f1]), (user_b, vec![f2])]));

    TwoFamilies {
        enforcer: IsolationEnforcer::new(Arc::new(test_registry()), Arc::new(memberships)),
        user_a,
        user_b,
        f1,
        f2,
    }
}

fn sql_of(predicate: &RowPredicate) -> String {
    let mut qb = QueryBuilder::<Postgres>::new("");
    predicate.push_sql(&mut qb, "r");
    qb.sql().to_string()
}

async fn predicate_for(
    enforcer: &IsolationEnforcer,
    ctx: &SessionContext,
    table: &str,
    operation: TableOperation,
) -> RowPredicate {
    let scope = enforcer.resolve_scope(ctx).await.unwrap();
    enforcer.authorize(&scope, table, operation).unwrap()
}

#[tokio::test]
async fn test_each_family_only_sees_its_own_children() {
    let t = two_families();

    let a = predicate_for(&t.enforcer, &user_ctx(t.user_a), "child_profiles", TableOperation::Select).await;
    let b = predicate_for(&t.enforcer, &user_ctx(t.user_b), "child_profiles", TableOperation::Select).await;

    assert!(a.admits_tenant(Some(t.f1)));
    assert!(!a.admits_tenant(Some(t.f2)));
    assert!(b.admits_tenant(Some(t.f2)));
    assert!(!b.admits_tenant(Some(t.f1)));
    assert!(!a.admits_tenant(None));
}

#[tokio::test]
async fn test_writes_into_another_family_are_denied() {
    let t = two_families();
    let ctx = user_ctx(t.user_a);
    let registration = t.enforcer.registry().require("child_profiles").unwrap();

    for operation in [TableOperation::Insert, TableOperation::Update] {
        let predicate = predicate_for(&t.enforcer, &ctx, "child_profiles", operation).await;

        let foreign = row(json!({"family_id": t.f2.to_string(), "first_name": "Liam"}));
        assert_eq!(
            t.enforcer.check_write(&predicate, &registration, &foreign),
            Err(IsolationError::Denied {
                table: "child_profiles".to_string()
            })
        );

        let own = row(json!({"family_id": t.f1.to_string(), "first_name": "Liam"}));
        assert!(t.enforcer.check_write(&predicate, &registration, &own).is_ok());
    }
}

#[tokio::test]
async fn test_row_without_family_is_denied() {
    let t = two_families();
    let registration = t.enforcer.registry().require("child_profiles").unwrap();
    let predicate = predicate_for(&t.enforcer, &user_ctx(t.user_a), "child_profiles", TableOperation::Insert).await;

    let orphan = row(json!({"first_name": "Liam"}));
    assert!(t.enforcer.check_write(&predicate, &registration, &orphan).is_err());
}

#[tokio::test]
async fn test_events_are_scoped_through_live_child_profiles() {
    let t = two_families();
    let predicate = predicate_for(&t.enforcer, &user_ctx(t.user_a), "game_events", TableOperation::Select).await;

    assert_eq!(
        sql_of(&predicate),
        "r.child_id IN (SELECT p.id FROM child_profiles p WHERE p.family_id = ANY($1) \
         AND p.archived_at IS NULL AND p.is_active = TRUE)"
    );
}

#[tokio::test]
async fn test_user_without_memberships_sees_nothing() {
    let t = two_families();
    let stranger = user_ctx(Uuid::new_v4());

    for table in ["families", "users", "child_profiles", "game_events"] {
        let predicate = predicate_for(&t.enforcer, &stranger, table, TableOperation::Select).await;
        assert!(predicate.is_deny(), "{} must be denied", table);
        assert_eq!(sql_of(&predicate), "FALSE");
    }
}

#[tokio::test]
async fn test_unauthenticated_context_is_denied_but_global_tables_stay_open() {
    let t = two_families();
    let ctx = SessionContext::system();

    let scoped = predicate_for(&t.enforcer, &ctx, "child_profiles", TableOperation::Select).await;
    assert!(scoped.is_deny());

    let global = predicate_for(&t.enforcer, &ctx, "achievements", TableOperation::Select).await;
    assert!(global.is_unrestricted());
}

#[tokio::test]
async fn test_membership_in_two_families_sees_both() {
    let user = Uuid::new_v4();
    let (f1, f2) = (Uuid::new_v4(), Uuid::new_v4());
    let enforcer = IsolationEnforcer::new(
        Arc::new(test_registry()),
        Arc::new(Memberships(HashMap::from([(user, vec![f1, f2])]))),
    );

    let predicate = predicate_for(&enforcer, &user_ctx(user), "families", TableOperation::Select).await;
    assert!(predicate.admits_tenant(Some(f1)));
    assert!(predicate.admits_tenant(Some(f2)));
    assert_eq!(sql_of(&predicate), "r.id = ANY($1)");
}

#[tokio::test]
async fn test_unregistered_table_is_rejected() {
    let t = two_families();
    let scope = t.enforcer.resolve_scope(&user_ctx(t.user_a)).await.unwrap();

    assert_eq!(
        t.enforcer.authorize(&scope, "payments", TableOperation::Select),
        Err(IsolationError::UnregisteredTable("payments".to_string()))
    );
}
