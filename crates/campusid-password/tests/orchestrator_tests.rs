//! Password-change orchestration scenarios.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use campusid_core::{CorrelationId, ExtLoginStatus};
use campusid_directory::{memory::MemoryDirectory, DirEntry};
use campusid_password::{
    Actor, ExitStatus, IntegrationRegistry, IntegrationRules, Integrations, PasswordOrchestrator,
    SyncAction, ACTION_CHANGE_PASSWORD,
};
use campusid_sync::{
    build_vendor, EncryptionMode, ExternalAuthMethod, ExternalSourceConfig, LocalDirectoryConfig,
    LocalUsers, MappingConfig, VendorKind,
};

const LOCAL_ADMIN: &str = "cn=admin,dc=campus,dc=example";
const EXT_ADMIN: &str = "cn=reader,dc=district,dc=example";
const LUKE_DN: &str = "campusExternalId=guid-luke,ou=people,dc=campus,dc=example";
const LUKE_EXT_DN: &str = "uid=luke.skywalker,ou=students,dc=district,dc=example";

/// Scripted dispatcher: per-system outcome plus a call log.
#[derive(Default)]
struct ScriptedIntegrations {
    outcomes: HashMap<String, (bool, String)>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedIntegrations {
    fn new(outcomes: &[(&str, bool, &str)]) -> Self {
        Self {
            outcomes: outcomes
                .iter()
                .map(|(system, ok, code)| {
                    (system.to_string(), (*ok, code.to_string()))
                })
                .collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Integrations for ScriptedIntegrations {
    async fn do_synchronous_action(
        &self,
        _action: &str,
        system: &str,
        _correlation_id: CorrelationId,
        _params: &Value,
    ) -> (bool, String) {
        self.calls.lock().unwrap().push(system.to_string());
        self.outcomes
            .get(system)
            .cloned()
            .unwrap_or((true, "ok".to_string()))
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

fn local_dir() -> Arc<MemoryDirectory> {
    let dir = Arc::new(MemoryDirectory::new(LOCAL_ADMIN, "admin-secret"));
    dir.seed(
        DirEntry::new(LUKE_DN)
            .with("uid", "luke.skywalker")
            .with("campusExternalId", "guid-luke")
            .with("sn", "Skywalker")
            .with_all("campusRole", vec!["student".to_string()])
            .with_all("campusSchool", vec!["hgw".to_string()])
            .with("userPassword", "oldforce"),
    );
    dir
}

fn external_dir() -> Arc<MemoryDirectory> {
    let dir = Arc::new(MemoryDirectory::new(EXT_ADMIN, "reader-secret"));
    dir.seed(
        DirEntry::new(LUKE_EXT_DN)
            .with("uid", "luke.skywalker")
            .with("entryUUID", "guid-luke")
            .with("sn", "Skywalker")
            .with("userPassword", "oldforce"),
    );
    dir
}

fn external_config() -> ExternalSourceConfig {
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
        mapping: MappingConfig::default(),
    }
}

fn rules_with_systems(systems: &[&str]) -> IntegrationRules {
    systems.iter().fold(IntegrationRules::new(), |rules, system| {
        rules.with_action("hgw", ACTION_CHANGE_PASSWORD, SyncAction::new(*system))
    })
}

fn luke_actor() -> Actor {
    Actor {
        dn: LUKE_DN.to_string(),
        username: "luke.skywalker".to_string(),
        password: "oldforce".to_string(),
    }
}

struct Fixture {
    local: Arc<MemoryDirectory>,
    external: Arc<MemoryDirectory>,
    integrations: Arc<ScriptedIntegrations>,
    orchestrator: PasswordOrchestrator,
}

fn fixture(
    with_vendor: bool,
    rules: IntegrationRules,
    integrations: ScriptedIntegrations,
) -> Fixture {
    let local = local_dir();
    let external = external_dir();
    let vendor = with_vendor
        .then(|| build_vendor(external_config(), external.clone()).unwrap());
    let integrations = Arc::new(integrations);
    let orchestrator = PasswordOrchestrator::new(
        vendor,
        LocalUsers::new(local.clone(), local_config()),
        integrations.clone(),
        Arc::new(IntegrationRegistry::new(rules)),
    );
    Fixture {
        local,
        external,
        integrations,
        orchestrator,
    }
}

fn local_password(fixture: &Fixture) -> String {
    fixture
        .local
        .entry(LUKE_DN)
        .unwrap()
        .get_first("userPassword")
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn full_change_through_all_three_stages() {
    let fixture = fixture(
        true,
        rules_with_systems(&["cloud-idp", "mail"]),
        ScriptedIntegrations::default(),
    );

    let result = fixture
        .orchestrator
        .change_password(&luke_actor(), "luke.skywalker", "newforce", CorrelationId::new())
        .await;

    assert_eq!(result.exit_status, ExitStatus::Success);
    assert_eq!(result.extlogin_status, ExtLoginStatus::Updated);
    assert_eq!(result.sync_status.as_deref(), Some("ok"));
    assert_eq!(local_password(&fixture), "newforce");
    // Upstream changed too.
    let ext = fixture.external.entry(LUKE_EXT_DN).unwrap();
    assert_eq!(ext.get_first("userPassword"), Some("newforce"));
    assert_eq!(fixture.integrations.calls(), vec!["cloud-idp", "mail"]);
}

#[tokio::test]
async fn upstream_not_configured_is_success_and_continues() {
    let fixture = fixture(false, IntegrationRules::new(), ScriptedIntegrations::default());

    let result = fixture
        .orchestrator
        .change_password(&luke_actor(), "luke.skywalker", "newforce", CorrelationId::new())
        .await;

    assert_eq!(result.exit_status, ExitStatus::Success);
    assert_eq!(result.extlogin_status, ExtLoginStatus::NotConfigured);
    assert_eq!(local_password(&fixture), "newforce");
}

#[tokio::test]
async fn target_missing_upstream_permits_local_change() {
    let fixture = fixture(true, IntegrationRules::new(), ScriptedIntegrations::default());
    // The target only exists locally.
    fixture.external.remove(LUKE_EXT_DN);
    fixture.external.seed(
        DirEntry::new("uid=actor.admin,ou=students,dc=district,dc=example")
            .with("uid", "actor.admin")
            .with("entryUUID", "guid-admin")
            .with("userPassword", "admin-pw"),
    );
    fixture.local.seed(
        DirEntry::new("campusExternalId=guid-admin,ou=people,dc=campus,dc=example")
            .with("uid", "actor.admin")
            .with("campusExternalId", "guid-admin")
            .with("userPassword", "admin-pw"),
    );
    fixture.local.set_rights_fn(|actor, _, _| actor.contains("guid-admin"));

    let actor = Actor {
        dn: "campusExternalId=guid-admin,ou=people,dc=campus,dc=example".to_string(),
        username: "actor.admin".to_string(),
        password: "admin-pw".to_string(),
    };
    let result = fixture
        .orchestrator
        .change_password(&actor, "luke.skywalker", "newforce", CorrelationId::new())
        .await;

    // The permitted skip is recorded, not hidden as success.
    assert_eq!(result.exit_status, ExitStatus::Success);
    assert_eq!(result.extlogin_status, ExtLoginStatus::UserMissing);
    assert_eq!(local_password(&fixture), "newforce");
}

#[tokio::test]
async fn bad_actor_credentials_abort_everything() {
    let fixture = fixture(
        true,
        rules_with_systems(&["cloud-idp"]),
        ScriptedIntegrations::default(),
    );
    let actor = Actor {
        password: "wrong".to_string(),
        ..luke_actor()
    };

    let result = fixture
        .orchestrator
        .change_password(&actor, "luke.skywalker", "newforce", CorrelationId::new())
        .await;

    assert_eq!(result.exit_status, ExitStatus::Failure);
    assert_eq!(result.extlogin_status, ExtLoginStatus::BadUserCreds);
    // Neither local nor downstream was touched.
    assert_eq!(local_password(&fixture), "oldforce");
    assert!(fixture.integrations.calls().is_empty());
}

#[tokio::test]
async fn unreachable_upstream_aborts_with_unavailable() {
    let fixture = fixture(true, IntegrationRules::new(), ScriptedIntegrations::default());
    fixture.external.set_offline(true);

    let result = fixture
        .orchestrator
        .change_password(&luke_actor(), "luke.skywalker", "newforce", CorrelationId::new())
        .await;

    assert_eq!(result.exit_status, ExitStatus::Failure);
    assert_eq!(result.extlogin_status, ExtLoginStatus::Unavailable);
    assert_eq!(local_password(&fixture), "oldforce");
}

#[tokio::test]
async fn missing_permission_aborts_before_commit() {
    let fixture = fixture(false, IntegrationRules::new(), ScriptedIntegrations::default());
    let actor = Actor {
        dn: "campusExternalId=guid-other,ou=people,dc=campus,dc=example".to_string(),
        username: "other.user".to_string(),
        password: "other-pw".to_string(),
    };

    let result = fixture
        .orchestrator
        .change_password(&actor, "luke.skywalker", "newforce", CorrelationId::new())
        .await;

    assert_eq!(result.exit_status, ExitStatus::Failure);
    assert_eq!(local_password(&fixture), "oldforce");
}

#[tokio::test]
async fn downstream_failure_rolls_back_and_skips_remaining_systems() {
    // Three systems; the second fails.
    let fixture = fixture(
        true,
        rules_with_systems(&["cloud-idp", "attendance", "mail"]),
        ScriptedIntegrations::new(&[("attendance", false, "policy_rejected")]),
    );

    let result = fixture
        .orchestrator
        .change_password(&luke_actor(), "luke.skywalker", "newforce", CorrelationId::new())
        .await;

    assert_eq!(result.exit_status, ExitStatus::Failure);
    assert_eq!(result.sync_status.as_deref(), Some("policy_rejected"));
    // The third system was never called.
    assert_eq!(fixture.integrations.calls(), vec!["cloud-idp", "attendance"]);
    // Actor equals target: the local password was rolled back to its
    // prior value.
    assert_eq!(local_password(&fixture), "oldforce");
}

#[tokio::test]
async fn downstream_failure_for_admin_change_does_not_roll_back() {
    let fixture = fixture(
        false,
        rules_with_systems(&["cloud-idp"]),
        ScriptedIntegrations::new(&[("cloud-idp", false, "unavailable")]),
    );
    fixture.local.set_rights_fn(|_, _, _| true);
    let actor = Actor {
        dn: "campusExternalId=guid-admin,ou=people,dc=campus,dc=example".to_string(),
        username: "actor.admin".to_string(),
        password: "admin-pw".to_string(),
    };

    let result = fixture
        .orchestrator
        .change_password(&actor, "luke.skywalker", "newforce", CorrelationId::new())
        .await;

    assert_eq!(result.exit_status, ExitStatus::Failure);
    // No rollback credential exists for someone else's password; the new
    // value stays.
    assert_eq!(local_password(&fixture), "newforce");
}

#[tokio::test]
async fn role_filter_skips_non_matching_system() {
    let rules = IntegrationRules::new()
        .with_action(
            "hgw",
            ACTION_CHANGE_PASSWORD,
            SyncAction::new("staff-portal").with_role_filter(vec!["teacher"]),
        )
        .with_action("hgw", ACTION_CHANGE_PASSWORD, SyncAction::new("cloud-idp"));
    let fixture = fixture(false, rules, ScriptedIntegrations::default());

    let result = fixture
        .orchestrator
        .change_password(&luke_actor(), "luke.skywalker", "newforce", CorrelationId::new())
        .await;

    assert_eq!(result.exit_status, ExitStatus::Success);
    // The student does not match the teacher-only system.
    assert_eq!(fixture.integrations.calls(), vec!["cloud-idp"]);
}

#[tokio::test]
async fn exempt_school_skips_downstream_entirely() {
    let rules = rules_with_systems(&["cloud-idp"]).with_exempt_school("hgw");
    let fixture = fixture(false, rules, ScriptedIntegrations::default());

    let result = fixture
        .orchestrator
        .change_password(&luke_actor(), "luke.skywalker", "newforce", CorrelationId::new())
        .await;

    assert_eq!(result.exit_status, ExitStatus::Success);
    assert!(result.sync_status.is_none());
    assert!(fixture.integrations.calls().is_empty());
    assert_eq!(local_password(&fixture), "newforce");
}

#[tokio::test]
async fn permission_dry_run_commits_nothing() {
    let fixture = fixture(false, IntegrationRules::new(), ScriptedIntegrations::default());

    assert!(fixture
        .orchestrator
        .check_permission(LUKE_DN, "luke.skywalker")
        .await
        .unwrap());
    assert!(!fixture
        .orchestrator
        .check_permission("campusExternalId=guid-other,ou=people,dc=campus,dc=example", "luke.skywalker")
        .await
        .unwrap());
    assert!(!fixture
        .orchestrator
        .check_permission(LUKE_DN, "nobody")
        .await
        .unwrap());

    assert_eq!(local_password(&fixture), "oldforce");
    assert!(fixture.integrations.calls().is_empty());
}
