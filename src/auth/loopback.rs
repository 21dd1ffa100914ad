use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use oauth2::basic::BasicClient;
use oauth2::url::Url;
use oauth2::{
    AuthUrl, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl,
    Scope, TokenUrl,
};
use tiny_http::{Response, Server, StatusCode};
use tracing::debug;

use crate::auth::{ClientSecrets, SCOPES};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Browser consent link plus what is needed to redeem the returned code.
pub struct ConsentRequest {
    pub url: Url,
    pub csrf_state: CsrfToken,
    pub pkce_verifier: PkceCodeVerifier,
}

pub fn consent_request(secrets: &ClientSecrets, redirect_uri: &str) -> Result<ConsentRequest> {
    let auth_url = AuthUrl::new(secrets.auth_uri.clone())
        .with_context(|| format!("parse oauth auth uri {}", secrets.auth_uri))?;
    let token_url = TokenUrl::new(secrets.token_uri.clone())
        .with_context(|| format!("parse oauth token uri {}", secrets.token_uri))?;
    let redirect_url = RedirectUrl::new(redirect_uri.to_string())
        .with_context(|| format!("parse oauth redirect uri {redirect_uri}"))?;

    let client = BasicClient::new(
        ClientId::new(secrets.client_id.clone()),
        Some(ClientSecret::new(secrets.client_secret.clone())),
        auth_url,
        Some(token_url),
    )
    .set_redirect_uri(redirect_url);

    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
    let (url, csrf_state) = client
        .authorize_url(CsrfToken::new_random)
        .add_scopes(SCOPES.iter().map(|scope| Scope::new(scope.to_string())))
        .add_extra_param("access_type", "offline")
        .add_extra_param("prompt", "consent")
        .set_pkce_challenge(pkce_challenge)
        .url();

    Ok(ConsentRequest {
        url,
        csrf_state,
        pkce_verifier,
    })
}

/// Local HTTP listener on 127.0.0.1 that receives the OAuth redirect.
pub struct LoopbackRedirect {
    server: Server,
    redirect_uri: String,
}

impl LoopbackRedirect {
    pub fn bind() -> Result<Self> {
        let server = Server::http(("127.0.0.1", 0))
            .map_err(|error| anyhow!("bind oauth redirect listener: {error}"))?;
        let port = server.server_addr().port();

        Ok(Self {
            server,
            redirect_uri: format!("http://127.0.0.1:{port}/"),
        })
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Answer redirect requests until one carries an authorization code,
    /// the provider reports an error, or `timeout` elapses.
    pub async fn wait_for_code(self, expected_state: String, timeout: Duration) -> Result<String> {
        tokio::task::spawn_blocking(move || self.serve_until_code(&expected_state, timeout))
            .await
            .context("join oauth redirect listener")?
    }

    fn serve_until_code(&self, expected_state: &str, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let Some(request) = self
                .server
                .recv_timeout(POLL_INTERVAL)
                .context("receive oauth redirect")?
            else {
                continue;
            };

            let outcome = parse_redirect_target(request.url(), expected_state);
            let (status, message) = match &outcome {
                Ok(Some(_)) => (200, "Authorization complete. You can close this window."),
                Ok(None) => (404, "Waiting for authorization."),
                Err(_) => (400, "Authorization failed. See the terminal for details."),
            };
            let response = Response::from_string(message).with_status_code(StatusCode(status));
            if let Err(error) = request.respond(response) {
                debug!(error = %error, "unable to answer oauth redirect");
            }

            if let Some(code) = outcome? {
                return Ok(code);
            }
        }

        bail!(
            "no authorization received within {} seconds",
            timeout.as_secs()
        )
    }
}

/// `Ok(None)` for requests that carry neither a code nor an error.
fn parse_redirect_target(target: &str, expected_state: &str) -> Result<Option<String>> {
    let url = Url::parse(&format!("http://127.0.0.1{target}"))
        .with_context(|| format!("parse oauth redirect target {target}"))?;

    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        bail!("authorization denied: {error}");
    }
    let Some(code) = code else {
        return Ok(None);
    };
    if state.as_deref() != Some(expected_state) {
        bail!("oauth redirect state mismatch");
    }
    Ok(Some(code))
}
