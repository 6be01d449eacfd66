//! Login flow: authenticate, then bootstrap the first circuit
//!
//! Status progression: Idle -> ConnectingToLogin -> ReadingResponse
//! [-> Redirecting -> ConnectingToLogin ...] -> ConnectingToSim ->
//! Success | Failed. Observers follow it on a watch channel.

use super::types::{LoginParams, LoginResponse, LoginStatus};
use super::xmlrpc::{XmlRpcClient, LOGIN_METHOD};
use crate::config::NetworkSettings;
use crate::networking::manager::{NetworkEvent, NetworkManager, SessionCredentials};
use crate::networking::{NetworkError, NetworkResult};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{info, warn};
use url::Url;

pub struct LoginClient {
    settings: Arc<NetworkSettings>,
    client: XmlRpcClient,
    status_tx: watch::Sender<LoginStatus>,
}

impl LoginClient {
    pub fn new(settings: Arc<NetworkSettings>) -> Self {
        let client = XmlRpcClient::new(&settings);
        let (status_tx, _) = watch::channel(LoginStatus::Idle);
        Self {
            settings,
            client,
            status_tx,
        }
    }

    /// Watch the login progress
    pub fn status(&self) -> watch::Receiver<LoginStatus> {
        self.status_tx.subscribe()
    }

    fn set_status(&self, status: LoginStatus) {
        self.status_tx.send_replace(status);
    }

    /// Full login: authenticate, store credentials, open the first
    /// circuit as current. Bounded by the login timeout.
    pub async fn login(
        &self,
        manager: &NetworkManager,
        params: &LoginParams,
    ) -> NetworkResult<LoginResponse> {
        match timeout(self.settings.login_timeout(), self.login_inner(manager, params)).await {
            Ok(result) => result,
            Err(_) => {
                self.set_status(LoginStatus::Failed);
                Err(NetworkError::HandshakeTimeout)
            }
        }
    }

    async fn login_inner(
        &self,
        manager: &NetworkManager,
        params: &LoginParams,
    ) -> NetworkResult<LoginResponse> {
        let response = self.authenticate(params).await?;

        if response.agent_id.is_nil() || response.session_id.is_nil() {
            self.set_status(LoginStatus::Failed);
            return Err(NetworkError::AuthenticationFailed {
                reason: "login response is missing session identifiers".to_string(),
            });
        }
        let credentials = SessionCredentials {
            agent_id: response.agent_id,
            session_id: response.session_id,
            secure_session_id: response.secure_session_id,
            circuit_code: response.circuit_code,
        };
        manager.set_credentials(credentials).await;

        self.set_status(LoginStatus::ConnectingToSim);
        let address = response.simulator_address().map_err(|e| {
            self.set_status(LoginStatus::Failed);
            e
        })?;

        match manager
            .connect(address, true, response.seed_capability.clone())
            .await
        {
            Ok(_) => {
                info!(
                    agent = format!("{} {}", response.first_name, response.last_name),
                    %address,
                    "login complete"
                );
                manager.emit(NetworkEvent::LoggedIn { credentials });
                self.set_status(LoginStatus::Success);
                Ok(response)
            }
            Err(e) => {
                self.set_status(LoginStatus::Failed);
                Err(e)
            }
        }
    }

    /// Run the XML-RPC exchange alone, following redirects, without
    /// touching any circuit
    pub async fn authenticate(&self, params: &LoginParams) -> NetworkResult<LoginResponse> {
        let mut url = self.settings.login_uri.clone();
        let mut method = LOGIN_METHOD.to_string();

        for redirects in 0..=self.settings.max_redirects {
            self.set_status(LoginStatus::ConnectingToLogin);
            let response = match self.client.login_to_simulator(&url, &method, params).await {
                Ok(response) => response,
                Err(e) => {
                    self.set_status(LoginStatus::Failed);
                    return Err(NetworkError::AuthenticationFailed {
                        reason: format!("{:#}", e),
                    });
                }
            };
            self.set_status(LoginStatus::ReadingResponse);

            if response.success {
                return Ok(response);
            }

            if response.indeterminate {
                if let Some(next_url) = response.next_url.clone() {
                    if let Err(e) = Url::parse(&next_url) {
                        self.set_status(LoginStatus::Failed);
                        return Err(NetworkError::AuthenticationFailed {
                            reason: format!("login redirect to invalid url {}: {}", next_url, e),
                        });
                    }
                    // a redirect may also rename the call it expects next
                    if let Some(next_method) = response.next_method.clone() {
                        method = next_method;
                    }
                    self.set_status(LoginStatus::Redirecting);
                    info!(redirects, from = url, to = next_url, method, "login redirected");
                    url = next_url;
                    continue;
                }
                warn!("indeterminate login response without next_url");
            }

            self.set_status(LoginStatus::Failed);
            let reason = response
                .reason
                .or(response.message)
                .unwrap_or_else(|| "unknown".to_string());
            return Err(NetworkError::LoginRejected { reason });
        }

        self.set_status(LoginStatus::Failed);
        Err(NetworkError::TooManyRedirects {
            limit: self.settings.max_redirects,
        })
    }
}
