mod common;

use common::mock_idp::{MockIdp, Reply};
use common::realm_config::{settings, write_role_mapping};
use http::header;
use oauth_realm::{AuthOutcome, Credentials, OAuthRealm, Principal};

const ROLES: &str = "admin:\n  - alice\nuser:\n  - alice\n  - bob\n";

fn authenticated(outcome: AuthOutcome) -> Principal {
    match outcome {
        AuthOutcome::Authenticated(principal) => principal,
        other => panic!("expected an authenticated principal, got {other:?}"),
    }
}

#[test]
fn test_bearer_token_resolves_to_principal_with_roles() {
    let idp = MockIdp::start(|request| match request.bearer() {
        Some("alice-token") => Reply::token_info("alice", 600, &["read", "write"]),
        _ => Reply::status(401),
    });
    let conf = tempfile::tempdir().unwrap();
    write_role_mapping(conf.path(), ROLES);

    let realm = OAuthRealm::from_settings(&settings(&idp.url(), conf.path())).unwrap();
    assert_eq!(realm.name(), "oauth1");
    assert!(realm.is_watching());

    let credentials = Credentials::http(Some("Bearer alice-token"));
    let principal = authenticated(realm.authenticate_request(&credentials));
    assert_eq!(principal.user_id, "alice");
    assert!(principal.has_role("admin"));
    assert!(principal.has_role("user"));
    assert!(principal.scopes.contains("write"));

    // Second request is served from the cache.
    authenticated(realm.authenticate_request(&credentials));
    assert_eq!(idp.calls(), 1);
    let stats = realm.cache_stats().unwrap();
    assert_eq!((stats.hits, stats.misses), (1, 1));
}

#[test]
fn test_idp_challenge_is_forwarded_to_caller() {
    let idp = MockIdp::always(Reply::challenge(401, "error=invalid_token"));
    let conf = tempfile::tempdir().unwrap();
    let realm = OAuthRealm::from_settings(&settings(&idp.url(), conf.path())).unwrap();

    let AuthOutcome::Rejected(rejection) =
        realm.authenticate_request(&Credentials::http(Some("Bearer revoked")))
    else {
        panic!("expected a rejection");
    };
    let response = rejection.into_response();
    assert_eq!(response.status(), 401);
    assert_eq!(
        response.headers()[header::WWW_AUTHENTICATE],
        r#"Bearer realm="security" charset="UTF-8" delegateError="error=invalid_token""#
    );
    let body: serde_json::Value = serde_json::from_str(response.body()).unwrap();
    assert_eq!(body["error"], "unauthorized");
    assert_eq!(idp.calls(), 1);
}

#[test]
fn test_internal_failures_get_generic_challenge() {
    let idp = MockIdp::always(Reply::status(404));
    let conf = tempfile::tempdir().unwrap();
    let realm = OAuthRealm::from_settings(&settings(&idp.url(), conf.path())).unwrap();

    for header in ["Bearer unknown", "Bearer    "] {
        match realm.authenticate_request(&Credentials::http(Some(header))) {
            AuthOutcome::Rejected(rejection) => assert_eq!(
                rejection.www_authenticate(),
                r#"Bearer realm="security" charset="UTF-8""#
            ),
            other => panic!("expected a rejection for {header:?}, got {other:?}"),
        }
    }
    // The empty bearer never reaches the IdP.
    assert_eq!(idp.calls(), 1);
}

#[test]
fn test_unreachable_idp_rejects() {
    let url = MockIdp::always(Reply::status(200)).url();
    let conf = tempfile::tempdir().unwrap();
    let realm = OAuthRealm::from_settings(&settings(&url, conf.path())).unwrap();
    assert!(matches!(
        realm.authenticate_request(&Credentials::http(Some("Bearer abc"))),
        AuthOutcome::Rejected(_)
    ));
}

#[test]
fn test_other_schemes_are_left_to_other_realms() {
    let idp = MockIdp::always(Reply::token_info("bob", 600, &[]));
    let conf = tempfile::tempdir().unwrap();
    let realm = OAuthRealm::from_settings(&settings(&idp.url(), conf.path())).unwrap();

    for credentials in [
        Credentials::http(None),
        Credentials::http(Some("Basic Ym9iOnNlY3JldA==")),
        Credentials::Transport,
    ] {
        assert_eq!(
            realm.authenticate_request(&credentials),
            AuthOutcome::NotApplicable
        );
    }
    assert_eq!(idp.calls(), 0);
}

#[test]
fn test_missing_role_mapping_authenticates_without_roles() {
    let idp = MockIdp::always(Reply::token_info("bob", 600, &["read"]));
    let conf = tempfile::tempdir().unwrap();
    let realm = OAuthRealm::from_settings(&settings(&idp.url(), conf.path())).unwrap();

    let principal = authenticated(realm.authenticate_request(&Credentials::http(Some("Bearer b"))));
    assert_eq!(principal.user_id, "bob");
    assert!(principal.roles.is_empty());
}

#[test]
fn test_missing_required_setting_fails_construction() {
    let conf = tempfile::tempdir().unwrap();
    let incomplete = settings("http://127.0.0.1:1/tokeninfo", conf.path())
        .with("token-info.field.scope", "");
    let err = OAuthRealm::from_settings(&incomplete).err().unwrap();
    assert_eq!(
        err.to_string(),
        "missing required setting [token-info.field.scope]"
    );
}
