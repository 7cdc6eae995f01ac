//! ---
//! ring_section: "07-member-agent"
//! ring_subsection: "module"
//! ring_type: "source"
//! ring_scope: "code"
//! ring_description: "Member agent runtime and probe pipelines."
//! ring_version: "v0.1.0-alpha"
//! ring_owner: "tbd"
//! ---
use std::time::{Duration, Instant};

use netring_common::RingError;
use netring_msg::{
    DeregisterRequest, HeartbeatRequest, MemberRecord, MembersResponse, MetricsSnapshot,
    RegisterRequest, RegisterResponse, ReportMetricsRequest,
};
use parking_lot::Mutex;
use reqwest::StatusCode;
use url::Url;

/// Timeout applied to ordinary control-plane calls.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the single pooled HTTP client a member uses for all outbound calls.
/// Redirects are not followed: a 3xx from a peer endpoint counts as success
/// on its own.
pub fn build_http_client() -> Result<reqwest::Client, RingError> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(5)
        .pool_idle_timeout(Duration::from_secs(30))
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|err| RingError::Fatal(format!("failed to build http client: {err}")))
}

/// Thin typed client for the registry control plane.
///
/// Transport failures and 5xx responses classify as `Transient`; 404/410
/// carry the membership disagreement back to the caller so the maintainer
/// can re-register.
pub struct RegistryClient {
    http: reqwest::Client,
    base: Url,
}

impl RegistryClient {
    pub fn new(http: reqwest::Client, base_url: &str) -> Result<Self, RingError> {
        let base = Url::parse(base_url)
            .map_err(|err| RingError::Fatal(format!("invalid registry url {base_url}: {err}")))?;
        Ok(Self { http, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url, RingError> {
        self.base
            .join(path)
            .map_err(|err| RingError::Fatal(format!("invalid registry path {path}: {err}")))
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, RingError> {
        let response = self
            .http
            .post(self.endpoint("/register")?)
            .timeout(CONTROL_TIMEOUT)
            .json(request)
            .send()
            .await
            .map_err(|err| RingError::Transient(format!("register: {err}")))?;
        let response = check_status(response, "register").await?;
        response
            .json::<RegisterResponse>()
            .await
            .map_err(|err| RingError::Transient(format!("register response: {err}")))
    }

    pub async fn heartbeat(&self, instance_id: &str) -> Result<(), RingError> {
        let response = self
            .http
            .post(self.endpoint("/heartbeat")?)
            .timeout(CONTROL_TIMEOUT)
            .json(&HeartbeatRequest {
                instance_id: instance_id.to_owned(),
            })
            .send()
            .await
            .map_err(|err| RingError::Transient(format!("heartbeat: {err}")))?;
        check_status(response, "heartbeat").await.map(|_| ())
    }

    /// Best-effort deregistration with a caller-chosen deadline, used during
    /// shutdown.
    pub async fn deregister(&self, instance_id: &str, deadline: Duration) -> Result<(), RingError> {
        let response = self
            .http
            .post(self.endpoint("/deregister")?)
            .timeout(deadline)
            .json(&DeregisterRequest {
                instance_id: instance_id.to_owned(),
            })
            .send()
            .await
            .map_err(|err| RingError::Transient(format!("deregister: {err}")))?;
        check_status(response, "deregister").await.map(|_| ())
    }

    pub async fn fetch_members(&self) -> Result<Vec<MemberRecord>, RingError> {
        let response = self
            .http
            .get(self.endpoint("/members")?)
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await
            .map_err(|err| RingError::Transient(format!("members: {err}")))?;
        let response = check_status(response, "members").await?;
        response
            .json::<MembersResponse>()
            .await
            .map(|body| body.members)
            .map_err(|err| RingError::Transient(format!("members response: {err}")))
    }

    pub async fn report_metrics(
        &self,
        instance_id: &str,
        snapshot: MetricsSnapshot,
    ) -> Result<(), RingError> {
        let response = self
            .http
            .post(self.endpoint("/report_metrics")?)
            .timeout(CONTROL_TIMEOUT)
            .json(&ReportMetricsRequest {
                instance_id: instance_id.to_owned(),
                snapshot,
            })
            .send()
            .await
            .map_err(|err| RingError::Transient(format!("report_metrics: {err}")))?;
        check_status(response, "report_metrics").await.map(|_| ())
    }
}

async fn check_status(
    response: reqwest::Response,
    context: &str,
) -> Result<reqwest::Response, RingError> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::NOT_FOUND => Err(RingError::NotFound(context.to_owned())),
        StatusCode::GONE => Err(RingError::Gone(context.to_owned())),
        StatusCode::BAD_REQUEST => {
            let detail = response.text().await.unwrap_or_default();
            Err(RingError::InvalidInput(format!("{context}: {detail}")))
        }
        status => Err(RingError::Transient(format!(
            "{context}: registry answered {status}"
        ))),
    }
}

/// Tracks when the registry last answered, for the `/health` verdict.
#[derive(Debug)]
pub struct Reachability {
    started: Instant,
    last_ok: Mutex<Option<Instant>>,
}

impl Reachability {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            last_ok: Mutex::new(None),
        }
    }

    pub fn mark_ok(&self) {
        *self.last_ok.lock() = Some(Instant::now());
    }

    /// How long the registry has been silent; measured from process start
    /// until the first successful call.
    pub fn silent_for(&self) -> Duration {
        self.last_ok
            .lock()
            .map(|at| at.elapsed())
            .unwrap_or_else(|| self.started.elapsed())
    }
}

impl Default for Reachability {
    fn default() -> Self {
        Self::new()
    }
}
