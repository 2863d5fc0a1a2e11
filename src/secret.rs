//! Managed secrets: the JWT signing secret, the auto-provisioned admin
//! credentials, and the operator's own credentials secret written by the
//! auth sub-loop.

use std::collections::BTreeMap;

use k8s_openapi::{api::core::v1::Secret, apimachinery::pkg::apis::meta::v1::ObjectMeta, ByteString};
use kube::{
    api::{Patch, PatchParams},
    Api, Client, Resource, ResourceExt,
};
use passwords::PasswordGenerator;

use crate::{apis::dittoserver_types::DittoServer, naming, Error};

const JWT_SECRET_KEY: &str = "jwt-secret";
const ADMIN_USERNAME_KEY: &str = "username";
const ADMIN_PASSWORD_KEY: &str = "password";

pub const OPERATOR_USERNAME_KEY: &str = "username";
pub const OPERATOR_PASSWORD_KEY: &str = "password";
pub const OPERATOR_ACCESS_TOKEN_KEY: &str = "access-token";
pub const OPERATOR_REFRESH_TOKEN_KEY: &str = "refresh-token";
pub const OPERATOR_SERVER_URL_KEY: &str = "server-url";

pub const OPERATOR_USERNAME: &str = "k8s-operator";
const OPERATOR_ROLE: &str = "operator";

pub struct OperatorCredentials {
    pub username: String,
    pub password: String,
    pub access_token: String,
    pub refresh_token: String,
    pub server_url: String,
}

/// Creates `{name}-jwt-secret` if it doesn't already exist. Never overwrites
/// an existing non-empty value — idempotent across passes.
pub async fn ensure_jwt_secret(client: &Client, cr: &DittoServer) -> Result<(), Error> {
    if cr.spec.identity.jwt.secretRef.is_some() {
        return Ok(());
    }
    let ns = cr.namespace().unwrap();
    let name = naming::jwt_secret_name(&cr.name_any());
    let api: Api<Secret> = Api::namespaced(client.clone(), &ns);

    if let Ok(existing) = api.get(&name).await {
        if has_nonempty_key(&existing, JWT_SECRET_KEY) {
            return Ok(());
        }
    }

    let mut data = BTreeMap::new();
    data.insert(JWT_SECRET_KEY.to_owned(), b64_encode(&generate_secret(32)));
    apply_secret(client, &ns, &name, cr, data).await
}

/// Creates `{name}-admin-credentials` with username `admin` and a fresh
/// 24-character password, unless the spec already references a
/// user-provided admin secret. Never overwrites an existing non-empty value.
pub async fn ensure_admin_credentials_secret(client: &Client, cr: &DittoServer) -> Result<(), Error> {
    if cr.spec.identity.admin.passwordSecretRef.is_some() {
        return Ok(());
    }
    let ns = cr.namespace().unwrap();
    let name = naming::admin_credentials_secret_name(&cr.name_any());
    let api: Api<Secret> = Api::namespaced(client.clone(), &ns);

    if let Ok(existing) = api.get(&name).await {
        if has_nonempty_key(&existing, ADMIN_PASSWORD_KEY) {
            return Ok(());
        }
    }

    let mut data = BTreeMap::new();
    data.insert(ADMIN_USERNAME_KEY.to_owned(), b64_encode("admin"));
    data.insert(ADMIN_PASSWORD_KEY.to_owned(), b64_encode(&generate_secret(24)));
    apply_secret(client, &ns, &name, cr, data).await
}

/// Create-or-update `{name}-operator-credentials` with all five keys. Called
/// after a successful bootstrap or refresh; always overwrites, since the
/// auth sub-loop is the sole writer.
pub async fn write_operator_credentials_secret(
    client: &Client,
    cr: &DittoServer,
    creds: &OperatorCredentials,
) -> Result<(), Error> {
    let ns = cr.namespace().unwrap();
    let name = naming::operator_credentials_secret_name(&cr.name_any());

    let mut data = BTreeMap::new();
    data.insert(OPERATOR_USERNAME_KEY.to_owned(), b64_encode(&creds.username));
    data.insert(OPERATOR_PASSWORD_KEY.to_owned(), b64_encode(&creds.password));
    data.insert(OPERATOR_ACCESS_TOKEN_KEY.to_owned(), b64_encode(&creds.access_token));
    data.insert(OPERATOR_REFRESH_TOKEN_KEY.to_owned(), b64_encode(&creds.refresh_token));
    data.insert(OPERATOR_SERVER_URL_KEY.to_owned(), b64_encode(&creds.server_url));

    apply_secret(client, &ns, &name, cr, data).await
}

/// Reads and UTF-8-decodes every key of a secret, by name, in the CR's
/// namespace. Returns `Ok(None)` when the secret does not exist (treated as
/// "missing" by callers, never an error on its own).
pub async fn read_secret_data(client: &Client, namespace: &str, name: &str) -> Result<Option<BTreeMap<String, String>>, Error> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    match api.get(name).await {
        Ok(secret) => Ok(Some(decode_secret(&secret))),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
        Err(e) => Err(Error::KubeError(e)),
    }
}

fn decode_secret(secret: &Secret) -> BTreeMap<String, String> {
    let mut decoded = BTreeMap::new();
    if let Some(data) = &secret.data {
        for (key, value) in data {
            if let Ok(s) = String::from_utf8(value.0.clone()) {
                decoded.insert(key.clone(), s);
            }
        }
    }
    decoded
}

fn has_nonempty_key(secret: &Secret, key: &str) -> bool {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|v| !v.0.is_empty())
        .unwrap_or(false)
}

async fn apply_secret(
    client: &Client,
    namespace: &str,
    name: &str,
    cr: &DittoServer,
    data: BTreeMap<String, ByteString>,
) -> Result<(), Error> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let oref = cr.controller_owner_ref(&()).unwrap();

    let mut labels = BTreeMap::new();
    labels.insert(naming::APP_LABEL.to_owned(), naming::APP_LABEL_VALUE.to_owned());
    labels.insert(naming::INSTANCE_LABEL.to_owned(), cr.name_any());

    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some(namespace.to_owned()),
            labels: Some(labels),
            owner_references: Some(vec![oref]),
            ..ObjectMeta::default()
        },
        data: Some(data),
        ..Secret::default()
    };

    let pp = PatchParams::apply(crate::FIELD_MANAGER).force();
    api.patch(name, &pp, &Patch::Apply(&secret)).await?;
    Ok(())
}

fn b64_encode(value: &str) -> ByteString {
    ByteString(value.as_bytes().to_vec())
}

fn generate_secret(length: usize) -> String {
    let generator = PasswordGenerator {
        length,
        numbers: true,
        lowercase_letters: true,
        uppercase_letters: true,
        symbols: false,
        spaces: false,
        exclude_similar_characters: false,
        strict: true,
    };
    generator.generate_one().expect("password generator with a positive length always succeeds")
}

pub fn operator_credentials_secret_name(cr_name: &str) -> String {
    naming::operator_credentials_secret_name(cr_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_secrets_are_requested_length_and_alphanumeric() {
        let secret = generate_secret(32);
        assert_eq!(secret.len(), 32);
        assert!(secret.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
