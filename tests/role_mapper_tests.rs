mod common;

use common::mock_idp::{MockIdp, Reply};
use common::realm_config::{settings, write_file, write_role_mapping};
use common::wait;
use oauth_realm::roles::RoleMappingError;
use oauth_realm::{AuthOutcome, Credentials, OAuthRealm, RoleMapper, RoleMappingSettings};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const WATCH_TIMEOUT: Duration = Duration::from_secs(10);

fn roles_of(mapper: &RoleMapper, user: &str) -> BTreeSet<String> {
    mapper.roles_for(user, &BTreeSet::new())
}

fn set(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| (*s).to_string()).collect()
}

#[test]
fn test_reload_swaps_mapping_and_notifies() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("roles.yml");
    write_file(&path, "user:\n  - bob\n");

    let mapper = RoleMapper::new(RoleMappingSettings::new(&path));
    let reloads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reloads);
    mapper.add_listener(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(roles_of(&mapper, "bob"), set(&["user"]));

    write_file(&path, "admin:\n  - bob\nuser:\n  - bob\n");
    mapper.reload().unwrap();
    assert_eq!(roles_of(&mapper, "bob"), set(&["admin", "user"]));

    write_file(&path, "admin: [unclosed");
    assert!(matches!(
        mapper.reload(),
        Err(RoleMappingError::Parse { .. })
    ));
    assert!(roles_of(&mapper, "bob").is_empty());
    assert_eq!(reloads.load(Ordering::SeqCst), 2);

    write_file(&path, "user:\n  - bob\n  - 321\n");
    mapper.reload().unwrap();
    assert_eq!(roles_of(&mapper, "bob"), set(&["user"]));
    assert_eq!(roles_of(&mapper, "321"), set(&["user"]));
    assert_eq!(reloads.load(Ordering::SeqCst), 3);
}

#[test]
fn test_watcher_swaps_numeric_identity_for_new_user() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("roles.yml");
    write_file(&path, "admin:\n  - 321\nuser:\n  - 123\n  - 321\n");

    let mapper = Arc::new(RoleMapper::new(RoleMappingSettings::new(&path)));
    let _watcher = mapper.watch().unwrap();
    assert_eq!(roles_of(&mapper, "321"), set(&["admin", "user"]));
    assert!(roles_of(&mapper, "user1").is_empty());

    write_file(&path, "only-role:\n  - user1\n");
    assert!(wait::until(WATCH_TIMEOUT, || {
        roles_of(&mapper, "user1") == set(&["only-role"])
    }));
    assert!(roles_of(&mapper, "321").is_empty());
}

#[test]
fn test_native_watcher_follows_file_changes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("roles.yml");
    write_file(&path, "user:\n  - bob\n");

    let mapper = Arc::new(RoleMapper::new(RoleMappingSettings::new(&path)));
    let _watcher = mapper.watch().unwrap();

    write_file(&path, "admin:\n  - bob\n");
    assert!(wait::until(WATCH_TIMEOUT, || roles_of(&mapper, "bob") == set(&["admin"])));

    std::fs::remove_file(&path).unwrap();
    assert!(wait::until(WATCH_TIMEOUT, || roles_of(&mapper, "bob").is_empty()));

    write_file(&path, "user: [bob\n");
    std::thread::sleep(Duration::from_millis(300));
    assert!(roles_of(&mapper, "bob").is_empty());

    write_file(&path, "user:\n  - bob\n");
    assert!(wait::until(WATCH_TIMEOUT, || roles_of(&mapper, "bob") == set(&["user"])));
}

#[test]
fn test_polling_watcher_picks_up_created_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("roles.yml");

    let mapper = Arc::new(RoleMapper::new(
        RoleMappingSettings::new(&path).poll_interval(Duration::from_millis(50)),
    ));
    assert!(mapper.mapping().is_empty());
    let _watcher = mapper.watch().unwrap();

    write_file(&path, "auditor: carol\n");
    assert!(wait::until(WATCH_TIMEOUT, || {
        roles_of(&mapper, "carol") == set(&["auditor"])
    }));
}

#[test]
fn test_unrelated_files_do_not_trigger_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("roles.yml");
    write_file(&path, "user:\n  - bob\n");

    let mapper = Arc::new(RoleMapper::new(RoleMappingSettings::new(&path)));
    let reloads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reloads);
    mapper.add_listener(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let _watcher = mapper.watch().unwrap();

    std::fs::write(dir.path().join("other.yml"), "admin: [bob]\n").unwrap();
    std::thread::sleep(Duration::from_millis(500));
    assert_eq!(reloads.load(Ordering::SeqCst), 0);
    assert_eq!(roles_of(&mapper, "bob"), set(&["user"]));
}

#[test]
fn test_role_change_reaches_cached_tokens() {
    let idp = MockIdp::always(Reply::token_info("bob", 600, &["read"]));
    let conf = tempfile::tempdir().unwrap();
    write_role_mapping(conf.path(), "user:\n  - bob\n");
    let realm = OAuthRealm::from_settings(&settings(&idp.url(), conf.path())).unwrap();
    let credentials = Credentials::http(Some("Bearer bob-token"));

    let roles = |outcome: AuthOutcome| match outcome {
        AuthOutcome::Authenticated(principal) => principal.roles,
        other => panic!("expected principal, got {other:?}"),
    };
    assert_eq!(roles(realm.authenticate_request(&credentials)), set(&["user"]));
    assert_eq!(idp.calls(), 1);

    write_role_mapping(conf.path(), "admin:\n  - bob\nuser:\n  - bob\n");
    realm.role_mapper().reload().unwrap();

    // The reload emptied the cache: the token is verified again and the new
    // roles apply immediately.
    assert_eq!(
        roles(realm.authenticate_request(&credentials)),
        set(&["admin", "user"])
    );
    assert!(idp.calls() >= 2);
}
