//! End-to-end synchronization scenarios over in-memory directories.

use std::sync::Arc;

use chrono::Utc;

use campusid_core::{CorrelationId, ExtLoginStatus, OrgId};
use campusid_directory::{memory::MemoryDirectory, DirEntry};
use campusid_sync::{
    build_vendor, school_year_label, EncryptionMode, ExternalAuthMethod, ExternalSourceConfig,
    GroupKind, LocalDirectoryConfig, LocalGroups, LocalUsers, MappingConfig, RuleOp, SyncEngine,
    SyncRule, VendorKind,
};

const EXT_ADMIN: &str = "cn=reader,dc=district,dc=example";
const LOCAL_ADMIN: &str = "cn=admin,dc=campus,dc=example";
const LUKE_EXT_DN: &str = "uid=luke.skywalker,ou=students,dc=district,dc=example";
const LUKE_LOCAL_DN: &str = "campusExternalId=guid-luke,ou=people,dc=campus,dc=example";

fn mapping() -> MappingConfig {
    MappingConfig {
        by_dn: vec![SyncRule::new(
            "*,ou=students,*",
            vec![RuleOp::AddRole("student".to_string())],
        )],
        by_group: vec![
            SyncRule::new(
                "cn=class-*,ou=groups,*",
                vec![RuleOp::YearClassGroup {
                    abbrev: "{match:cn=class-([^,]+)}".to_string(),
                    name: "Class {match:cn=class-([^,]+)} ({schoolyear})".to_string(),
                }],
            ),
            SyncRule::new(
                "cn=course-*,ou=groups,*",
                vec![RuleOp::TeachingGroup {
                    abbrev: "{match:cn=course-([^,]+)}".to_string(),
                    name: "Course {match:cn=course-([^,]+)}".to_string(),
                }],
            ),
        ],
        default_role: None,
        default_school: Some("hgw".to_string()),
        school_year_rollover_month: 8,
    }
}

fn external_config(mapping: MappingConfig) -> ExternalSourceConfig {
    ExternalSourceConfig {
        vendor: VendorKind::GenericLdap,
        admin_dn: EXT_ADMIN.to_string(),
        admin_secret: "reader-secret".to_string(),
        auth_method: ExternalAuthMethod::BindCredentials,
        encryption: EncryptionMode::StartTls,
        external_id_attribute: "entryUUID".to_string(),
        username_attribute: "uid".to_string(),
        learner_id_attribute: None,
        password_changed_attribute: None,
        subtrees: vec!["ou=students,dc=district,dc=example".to_string()],
        mapping,
    }
}

fn local_config() -> LocalDirectoryConfig {
    LocalDirectoryConfig {
        user_base: "ou=people,dc=campus,dc=example".to_string(),
        group_base: "ou=groups,dc=campus,dc=example".to_string(),
        admin_dn: LOCAL_ADMIN.to_string(),
        admin_secret: "admin-secret".to_string(),
    }
}

fn seed_luke(external: &MemoryDirectory) {
    external.seed(
        DirEntry::new(LUKE_EXT_DN)
            .with("uid", "luke.skywalker")
            .with("entryUUID", "guid-luke")
            .with("givenName", "Luke")
            .with("sn", "Skywalker")
            .with("userPassword", "theforce")
            .with_all(
                "memberOf",
                vec![
                    "cn=class-7a,ou=groups,dc=district,dc=example".to_string(),
                    "cn=course-math7,ou=groups,dc=district,dc=example".to_string(),
                ],
            ),
    );
}

struct Fixture {
    external: Arc<MemoryDirectory>,
    local: Arc<MemoryDirectory>,
    engine: SyncEngine,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn fixture_with(mapping: MappingConfig) -> Fixture {
    init_tracing();
    let external = Arc::new(MemoryDirectory::new(EXT_ADMIN, "reader-secret"));
    seed_luke(&external);
    let local = Arc::new(MemoryDirectory::new(LOCAL_ADMIN, "admin-secret"));

    let config = external_config(mapping);
    let vendor = build_vendor(config.clone(), external.clone()).unwrap();
    let engine = SyncEngine::new(
        OrgId::new(),
        Some((config, vendor)),
        LocalUsers::new(local.clone(), local_config()),
        LocalGroups::new(local.clone(), local_config()),
    );
    Fixture {
        external,
        local,
        engine,
    }
}

fn fixture() -> Fixture {
    fixture_with(mapping())
}

async fn login(fixture: &Fixture, username: &str, password: &str) -> ExtLoginStatus {
    fixture
        .engine
        .login_sync(username, password, CorrelationId::new())
        .await
        .status
}

fn local_users(fixture: &Fixture) -> LocalUsers {
    LocalUsers::new(fixture.local.clone(), local_config())
}

fn local_groups(fixture: &Fixture) -> LocalGroups {
    LocalGroups::new(fixture.local.clone(), local_config())
}

#[tokio::test]
async fn first_login_creates_user_with_mapped_state() {
    let fixture = fixture();

    let report = fixture
        .engine
        .login_sync("luke.skywalker", "theforce", CorrelationId::new())
        .await;
    assert_eq!(report.status, ExtLoginStatus::Updated);
    assert_eq!(report.user_dn.as_deref(), Some(LUKE_LOCAL_DN));

    let user = local_users(&fixture)
        .find_by_external_id("guid-luke")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.username, "luke.skywalker");
    assert!(user.roles.contains("student"));
    assert_eq!(user.schools, vec!["hgw".to_string()]);

    // Exactly one teaching group and one year class, named from the
    // templates.
    let groups = local_groups(&fixture);
    let year = groups
        .memberships(LUKE_LOCAL_DN, GroupKind::YearClass)
        .await
        .unwrap();
    assert_eq!(
        year,
        vec!["cn=yearclass-7a,ou=groups,dc=campus,dc=example".to_string()]
    );
    let teaching = groups
        .memberships(LUKE_LOCAL_DN, GroupKind::Teaching)
        .await
        .unwrap();
    assert_eq!(
        teaching,
        vec!["cn=teaching-math7,ou=groups,dc=campus,dc=example".to_string()]
    );

    let year_entry = fixture
        .local
        .entry("cn=yearclass-7a,ou=groups,dc=campus,dc=example")
        .unwrap();
    let expected_name = format!(
        "Class 7a ({})",
        school_year_label(Utc::now().date_naive(), 8)
    );
    assert_eq!(year_entry.get_first("displayName"), Some(expected_name.as_str()));

    // The supplied password now binds locally.
    assert!(local_users(&fixture)
        .verify_password(LUKE_LOCAL_DN, "theforce")
        .await
        .unwrap());
}

#[tokio::test]
async fn second_login_with_unchanged_data_is_nochange() {
    let fixture = fixture();
    assert_eq!(
        login(&fixture, "luke.skywalker", "theforce").await,
        ExtLoginStatus::Updated
    );

    let before = fixture
        .local
        .entry("cn=yearclass-7a,ou=groups,dc=campus,dc=example")
        .unwrap();

    assert_eq!(
        login(&fixture, "luke.skywalker", "theforce").await,
        ExtLoginStatus::NoChange
    );

    let after = fixture
        .local
        .entry("cn=yearclass-7a,ou=groups,dc=campus,dc=example")
        .unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn exclusive_conflict_leaves_zero_groups_of_that_category() {
    let fixture = fixture();
    // Two distinct year classes upstream.
    fixture.external.seed(
        DirEntry::new(LUKE_EXT_DN)
            .with("uid", "luke.skywalker")
            .with("entryUUID", "guid-luke")
            .with("sn", "Skywalker")
            .with("userPassword", "theforce")
            .with_all(
                "memberOf",
                vec![
                    "cn=class-7a,ou=groups,dc=district,dc=example".to_string(),
                    "cn=class-8b,ou=groups,dc=district,dc=example".to_string(),
                    "cn=course-math7,ou=groups,dc=district,dc=example".to_string(),
                ],
            ),
    );

    assert_eq!(
        login(&fixture, "luke.skywalker", "theforce").await,
        ExtLoginStatus::Updated
    );

    let year = local_groups(&fixture)
        .memberships(LUKE_LOCAL_DN, GroupKind::YearClass)
        .await
        .unwrap();
    assert!(year.is_empty(), "conflicting category must end up empty");
    // The non-conflicting category is unaffected.
    let teaching = local_groups(&fixture)
        .memberships(LUKE_LOCAL_DN, GroupKind::Teaching)
        .await
        .unwrap();
    assert_eq!(teaching.len(), 1);
}

#[tokio::test]
async fn conflict_after_assignment_removes_existing_membership() {
    let fixture = fixture();
    assert_eq!(
        login(&fixture, "luke.skywalker", "theforce").await,
        ExtLoginStatus::Updated
    );
    assert_eq!(
        local_groups(&fixture)
            .memberships(LUKE_LOCAL_DN, GroupKind::YearClass)
            .await
            .unwrap()
            .len(),
        1
    );

    // Upstream now reports two classes: the previously held membership is
    // removed, none of the candidates is picked.
    fixture.external.seed(
        DirEntry::new(LUKE_EXT_DN)
            .with("uid", "luke.skywalker")
            .with("entryUUID", "guid-luke")
            .with("sn", "Skywalker")
            .with("userPassword", "theforce")
            .with_all(
                "memberOf",
                vec![
                    "cn=class-7a,ou=groups,dc=district,dc=example".to_string(),
                    "cn=class-8b,ou=groups,dc=district,dc=example".to_string(),
                ],
            ),
    );

    assert_eq!(
        login(&fixture, "luke.skywalker", "theforce").await,
        ExtLoginStatus::Updated
    );
    assert!(local_groups(&fixture)
        .memberships(LUKE_LOCAL_DN, GroupKind::YearClass)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn removed_then_restored_user_survives_round_trip() {
    let fixture = fixture();
    assert_eq!(
        login(&fixture, "luke.skywalker", "theforce").await,
        ExtLoginStatus::Updated
    );

    // The user disappears upstream; the next login attempt soft-removes.
    fixture.external.remove(LUKE_EXT_DN);
    assert_eq!(
        login(&fixture, "luke.skywalker", "theforce").await,
        ExtLoginStatus::BadUserCreds
    );

    let users = local_users(&fixture);
    let user = users.find_by_external_id("guid-luke").await.unwrap().unwrap();
    assert!(user.removal_requested_at.is_some(), "soft removed, not deleted");
    assert!(!users.verify_password(LUKE_LOCAL_DN, "theforce").await.unwrap());

    // The account is restored upstream with the same external id; the
    // restoring login clears the removal state.
    seed_luke(&fixture.external);
    assert_eq!(
        login(&fixture, "luke.skywalker", "theforce").await,
        ExtLoginStatus::Updated
    );
    let user = users.find_by_external_id("guid-luke").await.unwrap().unwrap();
    assert!(user.removal_requested_at.is_none());
    assert!(users.verify_password(LUKE_LOCAL_DN, "theforce").await.unwrap());
}

#[tokio::test]
async fn wrong_password_for_linked_user_does_not_invalidate() {
    let fixture = fixture();
    assert_eq!(
        login(&fixture, "luke.skywalker", "theforce").await,
        ExtLoginStatus::Updated
    );

    assert_eq!(
        login(&fixture, "luke.skywalker", "sith-guess").await,
        ExtLoginStatus::BadUserCreds
    );

    // The correct local password still binds: same external identity, so
    // no invalidation happened.
    assert!(local_users(&fixture)
        .verify_password(LUKE_LOCAL_DN, "theforce")
        .await
        .unwrap());
}

#[tokio::test]
async fn wrong_password_with_external_id_mismatch_invalidates() {
    let fixture = fixture();
    assert_eq!(
        login(&fixture, "luke.skywalker", "theforce").await,
        ExtLoginStatus::Updated
    );

    // The username now belongs to a different external identity.
    fixture.external.seed(
        DirEntry::new(LUKE_EXT_DN)
            .with("uid", "luke.skywalker")
            .with("entryUUID", "guid-other")
            .with("sn", "Impostor")
            .with("userPassword", "other-password"),
    );

    assert_eq!(
        login(&fixture, "luke.skywalker", "stale-guess").await,
        ExtLoginStatus::UpdatedButFail
    );
    // The stale local credential stopped working immediately.
    assert!(!local_users(&fixture)
        .verify_password(LUKE_LOCAL_DN, "theforce")
        .await
        .unwrap());
}

#[tokio::test]
async fn changed_external_username_is_rewritten_and_old_password_revoked() {
    let fixture = fixture();
    assert_eq!(
        login(&fixture, "luke.skywalker", "theforce").await,
        ExtLoginStatus::Updated
    );

    // Upstream renames the login, same external id, new password.
    fixture.external.remove(LUKE_EXT_DN);
    fixture.external.seed(
        DirEntry::new("uid=l.skywalker,ou=students,dc=district,dc=example")
            .with("uid", "l.skywalker")
            .with("entryUUID", "guid-luke")
            .with("givenName", "Luke")
            .with("sn", "Skywalker")
            .with("userPassword", "newforce")
            .with_all(
                "memberOf",
                vec!["cn=class-7a,ou=groups,dc=district,dc=example".to_string()],
            ),
    );

    assert_eq!(
        login(&fixture, "l.skywalker", "newforce").await,
        ExtLoginStatus::Updated
    );

    let users = local_users(&fixture);
    let user = users.find_by_external_id("guid-luke").await.unwrap().unwrap();
    assert_eq!(user.username, "l.skywalker");
    // Old local password revoked, supplied one set in the same pass.
    assert!(!users.verify_password(LUKE_LOCAL_DN, "theforce").await.unwrap());
    assert!(users.verify_password(LUKE_LOCAL_DN, "newforce").await.unwrap());
}

#[tokio::test]
async fn unreachable_external_source_reports_unavailable() {
    let fixture = fixture();
    fixture.external.set_offline(true);
    assert_eq!(
        login(&fixture, "luke.skywalker", "theforce").await,
        ExtLoginStatus::Unavailable
    );
}

#[tokio::test]
async fn org_without_external_source_is_not_configured() {
    let local = Arc::new(MemoryDirectory::new(LOCAL_ADMIN, "admin-secret"));
    let engine = SyncEngine::new(
        OrgId::new(),
        None,
        LocalUsers::new(local.clone(), local_config()),
        LocalGroups::new(local, local_config()),
    );
    let report = engine
        .login_sync("luke.skywalker", "theforce", CorrelationId::new())
        .await;
    assert_eq!(report.status, ExtLoginStatus::NotConfigured);
}

#[tokio::test]
async fn locally_managed_account_is_refused() {
    let fixture = fixture();
    // A manually created account without external linkage.
    fixture.local.seed(
        DirEntry::new("uid=luke.skywalker,ou=people,dc=campus,dc=example")
            .with("uid", "luke.skywalker")
            .with("userPassword", "local-only"),
    );

    assert_eq!(
        login(&fixture, "luke.skywalker", "theforce").await,
        ExtLoginStatus::NotConfigured
    );
    // Untouched.
    let entry = fixture
        .local
        .entry("uid=luke.skywalker,ou=people,dc=campus,dc=example")
        .unwrap();
    assert_eq!(entry.get_first("userPassword"), Some("local-only"));
}

#[tokio::test]
async fn username_taken_by_other_identity_is_update_error() {
    let fixture = fixture();
    // A linked local account already owns the username, with a different
    // external id.
    fixture.local.seed(
        DirEntry::new("campusExternalId=guid-other,ou=people,dc=campus,dc=example")
            .with("uid", "luke.skywalker")
            .with("campusExternalId", "guid-other")
            .with("sn", "Other"),
    );

    assert_eq!(
        login(&fixture, "luke.skywalker", "theforce").await,
        ExtLoginStatus::UpdateError
    );
}

#[tokio::test]
async fn no_role_no_school_and_no_defaults_is_config_error() {
    let fixture = fixture_with(MappingConfig::default());
    assert_eq!(
        login(&fixture, "luke.skywalker", "theforce").await,
        ExtLoginStatus::ConfigError
    );
}
