use super::*;
use std::time::Duration;

use async_trait::async_trait;
use shared::{
    error::ErrorBody,
    protocol::{Ack, ApiEnvelope, TeamsResponse},
};
use tokio::sync::Mutex;

#[derive(Clone)]
enum Behavior<T> {
    Reply(T),
    Status(u16, ErrorBody),
    Refused,
    Hang,
}

struct FakeApi {
    subscribe: Behavior<Ack>,
    user: Behavior<ApiEnvelope<User>>,
    teams: Behavior<TeamsResponse>,
    update: Behavior<Ack>,
    calls: Mutex<Vec<String>>,
}

impl FakeApi {
    fn happy() -> Self {
        Self {
            subscribe: Behavior::Reply(Ack::ok(serde_json::Value::Null)),
            user: Behavior::Reply(ApiEnvelope::ok(user_following(&[1]))),
            teams: Behavior::Reply(TeamsResponse {
                data: Some(catalog(&[1, 2, 3])),
            }),
            update: Behavior::Reply(Ack::ok(serde_json::Value::Null)),
            calls: Mutex::new(Vec::new()),
        }
    }

    async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    async fn record(&self, call: String) {
        self.calls.lock().await.push(call);
    }
}

async fn refused_error() -> reqwest::Error {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    reqwest::Client::new()
        .get(format!("http://{addr}/"))
        .send()
        .await
        .expect_err("connection must be refused")
}

async fn resolve<T: Clone>(behavior: &Behavior<T>) -> Result<T, ApiCallError> {
    match behavior {
        Behavior::Reply(value) => Ok(value.clone()),
        Behavior::Status(status, body) => Err(ApiCallError::Status {
            status: *status,
            body: Some(body.clone()),
        }),
        Behavior::Refused => Err(ApiCallError::Transport(refused_error().await)),
        Behavior::Hang => std::future::pending().await,
    }
}

#[async_trait]
impl NewsletterApi for FakeApi {
    async fn subscribe(&self, email: &str) -> Result<Ack, ApiCallError> {
        self.record(format!("subscribe:{email}")).await;
        resolve(&self.subscribe).await
    }

    async fn get_user(&self, email: &str) -> Result<ApiEnvelope<User>, ApiCallError> {
        self.record(format!("get_user:{email}")).await;
        resolve(&self.user).await
    }

    async fn list_teams(&self) -> Result<TeamsResponse, ApiCallError> {
        self.record("list_teams".to_string()).await;
        resolve(&self.teams).await
    }

    async fn update_teams(&self, email: &str, team_ids: &[TeamId]) -> Result<Ack, ApiCallError> {
        let ids: Vec<i64> = team_ids.iter().map(|id| id.0).collect();
        self.record(format!("update_teams:{email}:{ids:?}")).await;
        resolve(&self.update).await
    }
}

fn catalog(ids: &[i64]) -> Vec<Team> {
    ids.iter()
        .map(|id| Team {
            id: TeamId(*id),
            name: format!("Team {id}"),
            abbreviation: format!("T{id}"),
            full_name: format!("City Team {id}"),
        })
        .collect()
}

fn user_following(ids: &[i64]) -> User {
    User {
        email: "fan@example.com".to_string(),
        teams: catalog(ids),
        players: Vec::new(),
        created_at: "2024-01-01T00:00:00Z".parse().expect("timestamp"),
        updated_at: "2024-01-01T00:00:00Z".parse().expect("timestamp"),
    }
}

async fn flow_at_selection(api: FakeApi) -> (SubscriptionFlow, Arc<FakeApi>) {
    let api = Arc::new(api);
    let mut flow = SubscriptionFlow::new(api.clone());
    flow.submit_email("fan@example.com")
        .await
        .expect("reach team selection");
    (flow, api)
}

fn selection(flow: &SubscriptionFlow) -> Vec<i64> {
    flow.state().selection.iter().map(|id| id.0).collect()
}

#[tokio::test]
async fn toggling_twice_restores_selection() {
    let (mut flow, _api) = flow_at_selection(FakeApi::happy()).await;
    let before = selection(&flow);

    assert!(flow.toggle_team(TeamId(2)).expect("select"));
    assert_eq!(selection(&flow), vec![1, 2]);
    assert!(!flow.toggle_team(TeamId(2)).expect("deselect"));

    assert_eq!(selection(&flow), before);
}

#[tokio::test]
async fn toggle_rejects_teams_outside_catalog() {
    let (mut flow, _api) = flow_at_selection(FakeApi::happy()).await;

    assert_eq!(
        flow.toggle_team(TeamId(42)),
        Err(FlowError::UnknownTeam(TeamId(42)))
    );
    assert_eq!(selection(&flow), vec![1]);
}

#[tokio::test]
async fn followed_team_missing_from_catalog_can_still_be_removed() {
    let api = FakeApi {
        user: Behavior::Reply(ApiEnvelope::ok(user_following(&[1, 30]))),
        ..FakeApi::happy()
    };
    let (mut flow, _api) = flow_at_selection(api).await;
    assert_eq!(selection(&flow), vec![1, 30]);

    assert!(!flow.toggle_team(TeamId(30)).expect("deselect"));
    assert_eq!(
        flow.toggle_team(TeamId(30)),
        Err(FlowError::UnknownTeam(TeamId(30)))
    );
    assert_eq!(selection(&flow), vec![1]);
}

#[tokio::test]
async fn team_operations_are_unavailable_before_subscribing() {
    let api = Arc::new(FakeApi::happy());
    let mut flow = SubscriptionFlow::new(api.clone());

    assert_eq!(
        flow.toggle_team(TeamId(1)),
        Err(FlowError::WrongStep {
            expected: FlowStep::SelectTeams,
            actual: FlowStep::Subscribe,
        })
    );
    assert!(matches!(
        flow.submit_teams().await,
        Err(FlowError::WrongStep { .. })
    ));
    assert!(!flow.can_submit_teams());
    assert!(api.calls().await.is_empty());
}

#[tokio::test]
async fn blank_email_is_refused_without_calls() {
    let api = Arc::new(FakeApi::happy());
    let mut flow = SubscriptionFlow::new(api.clone());

    assert_eq!(flow.submit_email("   ").await, Err(FlowError::EmptyEmail));
    assert!(api.calls().await.is_empty());
    assert!(!flow.state().loading);
}

#[tokio::test]
async fn blank_resubmit_clears_previous_error() {
    let api = Arc::new(FakeApi {
        subscribe: Behavior::Reply(Ack::failed("Already subscribed")),
        ..FakeApi::happy()
    });
    let mut flow = SubscriptionFlow::new(api.clone());
    flow.submit_email("fan@example.com").await.expect_err("first attempt");
    assert_eq!(flow.state().error.as_deref(), Some("Already subscribed"));
    let mut events = flow.subscribe_events();

    assert_eq!(flow.submit_email("").await, Err(FlowError::EmptyEmail));

    assert_eq!(flow.state().error, None);
    assert_eq!(events.try_recv().ok(), Some(FlowEvent::ErrorChanged(None)));
    assert_eq!(api.calls().await.len(), 1);
}

#[tokio::test]
async fn email_calls_run_in_order() {
    let (flow, api) = flow_at_selection(FakeApi::happy()).await;

    assert_eq!(flow.state().email, "fan@example.com");
    assert_eq!(
        api.calls().await,
        vec![
            "subscribe:fan@example.com".to_string(),
            "get_user:fan@example.com".to_string(),
            "list_teams".to_string(),
        ]
    );
}

#[tokio::test]
async fn transport_failure_on_each_email_call_leaves_flow_on_subscribe() {
    let variants = [
        FakeApi {
            subscribe: Behavior::Refused,
            ..FakeApi::happy()
        },
        FakeApi {
            user: Behavior::Refused,
            ..FakeApi::happy()
        },
        FakeApi {
            teams: Behavior::Refused,
            ..FakeApi::happy()
        },
    ];

    for api in variants {
        let mut flow = SubscriptionFlow::new(Arc::new(api));

        let err = flow.submit_email("fan@example.com").await.expect_err("must fail");

        assert_eq!(err, FlowError::Rejected(SUBSCRIBE_FALLBACK.into()));
        let state = flow.state();
        assert_eq!(state.step, FlowStep::Subscribe);
        assert!(!state.loading);
        assert_eq!(state.error.as_deref(), Some(SUBSCRIBE_FALLBACK));
        assert!(state.user.is_none());
        assert!(state.selection.is_empty());
    }
}

#[tokio::test]
async fn transport_failure_on_team_update_keeps_selection_step() {
    let api = FakeApi {
        update: Behavior::Refused,
        ..FakeApi::happy()
    };
    let (mut flow, _api) = flow_at_selection(api).await;

    let err = flow.submit_teams().await.expect_err("must fail");

    assert_eq!(err, FlowError::Rejected(SAVE_TEAMS_FALLBACK.into()));
    assert_eq!(flow.step(), FlowStep::SelectTeams);
    assert!(!flow.state().loading);
    assert_eq!(flow.state().error.as_deref(), Some(SAVE_TEAMS_FALLBACK));
    assert_eq!(selection(&flow), vec![1]);
}

#[tokio::test]
async fn update_failure_prefers_error_then_message_then_fallback() {
    let cases = [
        (
            Behavior::Reply(Ack {
                success: false,
                message: Some("Try later".into()),
                data: None,
                error: None,
            }),
            "Try later",
        ),
        (
            Behavior::Status(
                503,
                ErrorBody::new(Some("Maintenance".into()), Some("ignored".into())),
            ),
            "Maintenance",
        ),
        (
            Behavior::Reply(Ack {
                success: false,
                message: None,
                data: None,
                error: None,
            }),
            SAVE_TEAMS_FALLBACK,
        ),
    ];

    for (update, expected) in cases {
        let api = FakeApi {
            update,
            ..FakeApi::happy()
        };
        let (mut flow, _api) = flow_at_selection(api).await;

        flow.submit_teams().await.expect_err("must fail");

        assert_eq!(flow.state().error.as_deref(), Some(expected));
    }
}

#[tokio::test]
async fn business_failure_is_shown_and_flow_stays_put() {
    let api = Arc::new(FakeApi {
        subscribe: Behavior::Reply(Ack::failed("Invalid email address")),
        ..FakeApi::happy()
    });
    let mut flow = SubscriptionFlow::new(api.clone());

    flow.submit_email("fan@").await.expect_err("must fail");

    assert_eq!(
        flow.state().error.as_deref(),
        Some("Invalid email address")
    );
    assert_eq!(flow.step(), FlowStep::Subscribe);
    assert_eq!(api.calls().await, vec!["subscribe:fan@".to_string()]);
}

#[tokio::test]
async fn successful_email_step_publishes_changes_in_order() {
    let mut flow = SubscriptionFlow::new(Arc::new(FakeApi::happy()));
    let mut events = flow.subscribe_events();
    flow.submit_email("fan@example.com").await.expect("submit");
    assert_eq!(flow.state().error, None);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(
        seen,
        vec![
            FlowEvent::LoadingChanged(true),
            FlowEvent::LoadingChanged(false),
            FlowEvent::SelectionChanged(vec![TeamId(1)]),
            FlowEvent::StepChanged(FlowStep::SelectTeams),
        ]
    );
}

#[tokio::test]
async fn new_attempt_clears_previous_error_before_resolving() {
    let api = FakeApi {
        update: Behavior::Status(400, ErrorBody::new(Some("Nope".into()), None)),
        ..FakeApi::happy()
    };
    let (mut flow, _api) = flow_at_selection(api).await;
    flow.submit_teams().await.expect_err("first attempt");
    let mut events = flow.subscribe_events();

    flow.submit_teams().await.expect_err("second attempt");

    assert_eq!(events.try_recv().ok(), Some(FlowEvent::ErrorChanged(None)));
    assert_eq!(
        events.try_recv().ok(),
        Some(FlowEvent::LoadingChanged(true))
    );
    assert_eq!(flow.state().error.as_deref(), Some("Nope"));
}

#[tokio::test]
async fn empty_selection_disables_submit_control() {
    let api = FakeApi {
        user: Behavior::Reply(ApiEnvelope::failed("User not found")),
        ..FakeApi::happy()
    };
    let (mut flow, _api) = flow_at_selection(api).await;
    assert!(!flow.can_submit_teams());

    flow.toggle_team(TeamId(3)).expect("select");
    assert!(flow.can_submit_teams());
}

#[tokio::test]
async fn cancel_discards_inflight_call() {
    let api = FakeApi {
        teams: Behavior::Hang,
        ..FakeApi::happy()
    };
    let mut flow = SubscriptionFlow::new(Arc::new(api));
    let handle = flow.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();
    });

    let err = flow.submit_email("fan@example.com").await.expect_err("cancelled");

    assert_eq!(err, FlowError::Cancelled);
    let state = flow.state();
    assert_eq!(state.step, FlowStep::Subscribe);
    assert!(!state.loading);
    assert_eq!(state.error, None);
    assert!(state.user.is_none());
    assert!(state.teams.is_empty());
}

#[tokio::test]
async fn cancel_between_operations_does_not_poison_the_next_one() {
    let mut flow = SubscriptionFlow::new(Arc::new(FakeApi::happy()));
    flow.cancel_handle().cancel();

    let step = flow.submit_email("fan@example.com").await.expect("submit");
    assert_eq!(step, FlowStep::SelectTeams);
}

#[tokio::test]
async fn confirmed_flow_ignores_further_input() {
    let (mut flow, api) = flow_at_selection(FakeApi::happy()).await;
    flow.toggle_team(TeamId(3)).expect("select");
    flow.submit_teams().await.expect("submit");
    let calls = api.calls().await;
    assert_eq!(
        calls.last().map(String::as_str),
        Some("update_teams:fan@example.com:[1, 3]")
    );

    assert!(flow.submit_email("other@example.com").await.is_err());
    assert!(flow.toggle_team(TeamId(2)).is_err());
    assert!(flow.submit_teams().await.is_err());

    assert_eq!(flow.step(), FlowStep::Confirmed);
    assert_eq!(selection(&flow), vec![1, 3]);
    assert_eq!(api.calls().await, calls);
}
