//! Bootstrap and refresh of the operator's own service-account credentials
//! against the managed server's REST API, with exponential backoff and
//! state preserved across transient failures.

use std::time::Duration;

use kube::{
    api::{Api, Patch, PatchParams},
    runtime::events::{Event, EventType, Recorder},
    Client, ResourceExt,
};
use serde_json::json;
use tracing::{info, warn};

use crate::{
    apis::dittoserver_types::DittoServer,
    naming,
    requeue::{compute_backoff, RequeueHint},
    rest_client::{RestClient, RestClientError},
    secret::{self, OperatorCredentials},
    Config, Error, AUTH_RETRY_COUNT_ANNOTATION,
};

pub const TYPE_AUTHENTICATED: &str = crate::conditions::TYPE_AUTHENTICATED;
const DEFAULT_TOKEN_TTL_FALLBACK_SECS: u64 = 600;
const OPERATOR_ROLE: &str = "operator";

#[derive(Debug, Clone)]
pub struct AuthStatus {
    pub authenticated: bool,
    pub reason: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct AuthOutcome {
    pub status: AuthStatus,
    pub requeue: RequeueHint,
}

/// Runs one pass of the auth sub-loop for a CR: bootstrap if the
/// operator-credentials secret is absent, otherwise refresh. Transient
/// failures are swallowed into the returned status/requeue; permanent
/// failures propagate as `Error`.
pub async fn run(client: &Client, recorder: &Recorder, cr: &DittoServer, cfg: &Config) -> Result<AuthOutcome, Error> {
    let ns = cr.namespace().unwrap();
    let name = cr.name_any();
    let operator_secret_name = naming::operator_credentials_secret_name(&name);
    let retry_count = current_retry_count(cr);

    let existing = secret::read_secret_data(client, &ns, &operator_secret_name).await?;

    let result = match existing {
        None => bootstrap(client, cr, &ns, &name).await,
        Some(data) => refresh(client, cr, &data).await,
    };

    match result {
        Ok((creds, ttl_secs)) => {
            secret::write_operator_credentials_secret(client, cr, &creds).await?;
            reset_retry_count(client, cr, retry_count).await?;
            let next = if ttl_secs > 0 {
                Duration::from_secs_f64(0.8 * ttl_secs as f64)
            } else {
                Duration::from_secs(DEFAULT_TOKEN_TTL_FALLBACK_SECS)
            };
            Ok(AuthOutcome {
                status: AuthStatus {
                    authenticated: true,
                    reason: "AuthenticationSucceeded",
                    message: "operator credentials are valid".to_owned(),
                },
                requeue: RequeueHint::after(next),
            })
        }
        Err(e) if e.is_transient() => {
            if retry_count == 0 {
                publish_warning(recorder, "AuthAPIUnreachable", &format!("managed server unreachable: {e}")).await;
            }
            let new_count = retry_count + 1;
            bump_retry_count(client, cr, new_count).await?;
            let backoff = compute_backoff(new_count, Duration::from_secs(cfg.auth_backoff_cap_secs));
            warn!(error = %e, retry_count = new_count, "auth sub-loop transient failure");
            Ok(AuthOutcome {
                status: AuthStatus {
                    authenticated: false,
                    reason: "APIUnreachable",
                    message: e.to_string(),
                },
                requeue: RequeueHint::after(backoff),
            })
        }
        Err(e) => Err(Error::RestApiError {
            code: "AUTH_PERMANENT_FAILURE".to_owned(),
            message: e.to_string(),
        }),
    }
}

async fn bootstrap(client: &Client, cr: &DittoServer, ns: &str, name: &str) -> Result<(OperatorCredentials, i64), RestClientError> {
    let server_url = effective_server_url(cr, ns, name);
    let rest = RestClient::new(&server_url);

    let (admin_username, admin_password) = admin_credentials(client, cr, ns, name)
        .await
        .map_err(|_| transient_placeholder())?;

    let admin_tokens = rest.login(&admin_username, &admin_password).await?;

    let operator_password = secret_generate(24);
    match rest
        .create_user(&admin_tokens.access_token, naming_operator_username(), &operator_password, OPERATOR_ROLE)
        .await
    {
        Ok(()) => {}
        Err(e) if e.is_conflict() => {
            info!("operator user already exists, proceeding to login");
        }
        Err(e) => return Err(e),
    }

    let operator_tokens = rest.login(naming_operator_username(), &operator_password).await?;

    let creds = OperatorCredentials {
        username: naming_operator_username().to_owned(),
        password: operator_password,
        access_token: operator_tokens.access_token,
        refresh_token: operator_tokens.refresh_token,
        server_url,
    };
    Ok((creds, operator_tokens.expires_in))
}

async fn refresh(client: &Client, cr: &DittoServer, data: &std::collections::BTreeMap<String, String>) -> Result<(OperatorCredentials, i64), RestClientError> {
    let _ = client;
    let username = data.get(secret::OPERATOR_USERNAME_KEY).cloned().unwrap_or_else(|| naming_operator_username().to_owned());
    let password = data.get(secret::OPERATOR_PASSWORD_KEY).cloned().unwrap_or_default();
    let server_url = data.get(secret::OPERATOR_SERVER_URL_KEY).cloned().unwrap_or_else(|| effective_server_url(cr, &cr.namespace().unwrap(), &cr.name_any()));
    let refresh_token = data.get(secret::OPERATOR_REFRESH_TOKEN_KEY).cloned().unwrap_or_default();

    let rest = RestClient::new(&server_url);

    let tokens = match rest.refresh(&refresh_token).await {
        Ok(tokens) => tokens,
        Err(_) => rest.login(&username, &password).await?,
    };

    let creds = OperatorCredentials {
        username,
        password,
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        server_url,
    };
    Ok((creds, tokens.expires_in))
}

fn naming_operator_username() -> &'static str {
    secret::OPERATOR_USERNAME
}

fn secret_generate(length: usize) -> String {
    use passwords::PasswordGenerator;
    PasswordGenerator {
        length,
        numbers: true,
        lowercase_letters: true,
        uppercase_letters: true,
        symbols: false,
        spaces: false,
        exclude_similar_characters: false,
        strict: true,
    }
    .generate_one()
    .expect("password generator with a positive length always succeeds")
}

async fn admin_credentials(client: &Client, cr: &DittoServer, ns: &str, name: &str) -> Result<(String, String), Error> {
    if let Some(secret_ref) = &cr.spec.identity.admin.passwordSecretRef {
        let data = secret::read_secret_data(client, ns, &secret_ref.name)
            .await?
            .ok_or_else(|| Error::MissingSecretError(secret_ref.name.clone()))?;
        let password = data
            .get(&secret_ref.key)
            .cloned()
            .ok_or_else(|| Error::MissingSecretError(format!("{}/{}", secret_ref.name, secret_ref.key)))?;
        return Ok(("admin".to_owned(), password));
    }
    let admin_secret_name = naming::admin_credentials_secret_name(name);
    secret::ensure_admin_credentials_secret(client, cr).await?;
    let data = secret::read_secret_data(client, ns, &admin_secret_name)
        .await?
        .ok_or_else(|| Error::MissingSecretError(admin_secret_name.clone()))?;
    let password = data
        .get("password")
        .cloned()
        .ok_or_else(|| Error::MissingSecretError(format!("{admin_secret_name}/password")))?;
    Ok(("admin".to_owned(), password))
}

fn transient_placeholder() -> RestClientError {
    RestClientError::Api {
        code: "MISSING_ADMIN_SECRET".to_owned(),
        message: "admin credentials secret not yet available".to_owned(),
    }
}

fn effective_server_url(cr: &DittoServer, ns: &str, name: &str) -> String {
    format!(
        "http://{}.{}.svc.cluster.local:{}",
        naming::api_service_name(name),
        ns,
        cr.spec.controlPlane.effective_port()
    )
}

fn current_retry_count(cr: &DittoServer) -> i64 {
    cr.annotations()
        .get(AUTH_RETRY_COUNT_ANNOTATION)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

async fn reset_retry_count(client: &Client, cr: &DittoServer, previous: i64) -> Result<(), Error> {
    if previous == 0 {
        return Ok(());
    }
    patch_retry_count_annotation(client, cr, 0).await
}

async fn bump_retry_count(client: &Client, cr: &DittoServer, new_count: i64) -> Result<(), Error> {
    patch_retry_count_annotation(client, cr, new_count).await
}

async fn patch_retry_count_annotation(client: &Client, cr: &DittoServer, value: i64) -> Result<(), Error> {
    let ns = cr.namespace().unwrap();
    let api: Api<DittoServer> = Api::namespaced(client.clone(), &ns);
    let patch = json!({
        "metadata": {
            "annotations": {
                AUTH_RETRY_COUNT_ANNOTATION: value.to_string(),
            }
        }
    });
    api.patch(&cr.name_any(), &PatchParams::default(), &Patch::Merge(&patch)).await?;
    Ok(())
}

async fn publish_warning(recorder: &Recorder, reason: &str, message: &str) {
    let _ = recorder
        .publish(Event {
            type_: EventType::Warning,
            reason: reason.to_owned(),
            note: Some(message.to_owned()),
            action: "AuthSubLoop".to_owned(),
            secondary: None,
        })
        .await;
}
