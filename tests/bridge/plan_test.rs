//! Tests for `bridge::plan` connection strategy resolution.

use mmbridge::bridge::{BridgeError, ConnectionPlan, InboundPump, OutboundSink};
use mmbridge::config::MattermostConfig;
use mmbridge::mattermost::client::Credentials;

const BIND: &str = "127.0.0.1:9999";
const URL: &str = "https://mm.example.com/hooks/abc123";

fn config(bind: bool, url: bool, token: bool, login: bool) -> MattermostConfig {
    let set = |on: bool, value: &str| on.then(|| value.to_string());
    MattermostConfig {
        webhook_bind_address: set(bind, BIND),
        webhook_url: set(url, URL),
        token: set(token, "tok-123"),
        login: set(login, "relay-bot"),
        password: set(login, "hunter2"),
        ..Default::default()
    }
}

#[test]
fn all_sixteen_combinations_follow_the_rule_table() {
    // (B, W, T, L) -> rendered plan, or None for a configuration error.
    let table: [(bool, bool, bool, bool, Option<&str>); 16] = [
        (false, false, false, false, None),
        (false, false, false, true, Some("inbound=session outbound=session auth=password")),
        (false, false, true, false, Some("inbound=session outbound=session auth=token")),
        (false, false, true, true, Some("inbound=session outbound=session auth=token")),
        (false, true, false, false, Some("inbound=none outbound=webhook auth=none")),
        (false, true, false, true, Some("inbound=session outbound=webhook auth=password")),
        (false, true, true, false, Some("inbound=session outbound=webhook auth=token")),
        (false, true, true, true, Some("inbound=session outbound=webhook auth=token")),
        (true, false, false, false, Some("inbound=webhook(127.0.0.1:9999) outbound=none auth=none")),
        (true, false, false, true, Some("inbound=webhook(127.0.0.1:9999) outbound=session auth=password")),
        (true, false, true, false, Some("inbound=webhook(127.0.0.1:9999) outbound=session auth=token")),
        (true, false, true, true, Some("inbound=webhook(127.0.0.1:9999) outbound=session auth=token")),
        (true, true, false, false, Some("inbound=webhook(127.0.0.1:9999) outbound=webhook auth=none")),
        (true, true, false, true, Some("inbound=webhook(127.0.0.1:9999) outbound=webhook auth=none")),
        (true, true, true, false, Some("inbound=webhook(127.0.0.1:9999) outbound=webhook auth=none")),
        (true, true, true, true, Some("inbound=webhook(127.0.0.1:9999) outbound=webhook auth=none")),
    ];

    for (b, w, t, l, expected) in table {
        let result = ConnectionPlan::resolve(&config(b, w, t, l));
        match (result, expected) {
            (Ok(plan), Some(rendered)) => {
                assert_eq!(plan.to_string(), rendered, "B={b} W={w} T={t} L={l}");
            }
            (Err(BridgeError::Config(msg)), None) => {
                assert_eq!(msg, "no connection method configured");
            }
            (other, expected) => {
                panic!("B={b} W={w} T={t} L={l}: got {other:?}, expected {expected:?}")
            }
        }
    }
}

#[test]
fn resolution_is_deterministic() {
    let cfg = config(false, true, true, true);
    let first = ConnectionPlan::resolve(&cfg).expect("plan");
    let second = ConnectionPlan::resolve(&cfg).expect("plan");
    assert_eq!(first, second);
}

#[test]
fn token_wins_over_login() {
    let plan = ConnectionPlan::resolve(&config(false, false, true, true)).expect("plan");
    assert_eq!(
        plan.credentials,
        Some(Credentials::Token("tok-123".to_string()))
    );
}

#[test]
fn login_credentials_carry_password() {
    let plan = ConnectionPlan::resolve(&config(false, false, false, true)).expect("plan");
    assert_eq!(
        plan.credentials,
        Some(Credentials::Password {
            login: "relay-bot".to_string(),
            password: "hunter2".to_string(),
        })
    );
    assert!(plan.is_session_only());
}

#[test]
fn webhook_pair_never_logs_in() {
    let plan = ConnectionPlan::resolve(&config(true, true, true, true)).expect("plan");
    assert!(!plan.needs_session());
    assert_eq!(
        plan.inbound,
        InboundPump::Webhook {
            bind_address: BIND.to_string()
        }
    );
    assert_eq!(
        plan.outbound,
        OutboundSink::Webhook {
            url: URL.to_string()
        }
    );
}

#[test]
fn blank_values_count_as_unset() {
    let cfg = MattermostConfig {
        webhook_bind_address: Some("  ".to_string()),
        webhook_url: Some(String::new()),
        token: Some("tok".to_string()),
        ..Default::default()
    };
    let plan = ConnectionPlan::resolve(&cfg).expect("plan");
    assert!(plan.is_session_only());
}

#[test]
fn rendered_plan_hides_webhook_url() {
    let plan = ConnectionPlan::resolve(&config(false, true, false, false)).expect("plan");
    assert!(!plan.to_string().contains("abc123"));
}
