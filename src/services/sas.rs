//! Time-bound capability URLs for the local store.
//!
//! A capability is the blob URL plus `sv`, `sr`, `sp`, `se` and `sig` query
//! parameters. `sig` is the base64 HMAC-SHA256, keyed with the account key, of
//! `"{sp}\n{se}\n/{account}/{container}/{blob}"`.

use crate::{
    errors::{StorageError, StorageResult},
    models::{blob_ref::BlobRef, copy::SasPermissions},
};
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::Url;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const SAS_VERSION: &str = "1";

/// Fresh random 32-byte account key, base64 encoded.
pub fn generate_key() -> String {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(Uuid::new_v4().as_bytes());
    key.extend_from_slice(Uuid::new_v4().as_bytes());
    general_purpose::STANDARD.encode(key)
}

pub fn sign(
    key: &str,
    blob: &BlobRef,
    permissions: SasPermissions,
    expires_on: DateTime<Utc>,
) -> StorageResult<Url> {
    let sp = permissions.to_sp();
    let se = expires_on.to_rfc3339_opts(SecondsFormat::Secs, true);
    let digest = mac(key, &sp, &se, blob)?.finalize().into_bytes();
    let signature = general_purpose::STANDARD.encode(digest);

    let mut url = blob.url().clone();
    url.query_pairs_mut()
        .append_pair("sv", SAS_VERSION)
        .append_pair("sr", "b")
        .append_pair("sp", &sp)
        .append_pair("se", &se)
        .append_pair("sig", &signature);
    Ok(url)
}

/// Check a capability URL against the account key and return the blob it grants
/// access to together with the granted permissions.
pub fn verify(
    key: &str,
    url: &Url,
    now: DateTime<Utc>,
) -> StorageResult<(BlobRef, SasPermissions)> {
    let blob = BlobRef::from_url(url)?;

    let mut sp = None;
    let mut se = None;
    let mut sig = None;
    for (name, value) in url.query_pairs() {
        match name.as_ref() {
            "sp" => sp = Some(value.into_owned()),
            "se" => se = Some(value.into_owned()),
            "sig" => sig = Some(value.into_owned()),
            _ => {}
        }
    }

    let missing = |name: &str| StorageError::AuthorizationFailed(format!("missing `{}`", name));
    let sp = sp.ok_or_else(|| missing("sp"))?;
    let se = se.ok_or_else(|| missing("se"))?;
    let sig = sig.ok_or_else(|| missing("sig"))?;

    let signature = general_purpose::STANDARD
        .decode(sig.as_bytes())
        .map_err(|_| StorageError::AuthorizationFailed("malformed signature".into()))?;
    mac(key, &sp, &se, &blob)?
        .verify_slice(&signature)
        .map_err(|_| StorageError::AuthorizationFailed("signature mismatch".into()))?;

    let expires_on = DateTime::parse_from_rfc3339(&se)
        .map_err(|_| StorageError::AuthorizationFailed(format!("malformed expiry `{}`", se)))?
        .with_timezone(&Utc);
    if expires_on <= now {
        return Err(StorageError::AuthorizationFailed(format!(
            "capability expired at {}",
            se
        )));
    }

    let permissions = SasPermissions::from_sp(&sp)
        .ok_or_else(|| StorageError::AuthorizationFailed(format!("unknown permissions `{}`", sp)))?;

    Ok((blob, permissions))
}

fn mac(key: &str, sp: &str, se: &str, blob: &BlobRef) -> StorageResult<HmacSha256> {
    let key = general_purpose::STANDARD
        .decode(key.as_bytes())
        .map_err(|_| StorageError::AuthorizationFailed("invalid account key".into()))?;
    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|_| StorageError::AuthorizationFailed("invalid account key".into()))?;
    mac.update(
        format!(
            "{}\n{}\n/{}/{}/{}",
            sp,
            se,
            blob.account(),
            blob.container_name(),
            blob.name()
        )
        .as_bytes(),
    );
    Ok(mac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn blob(url: &str) -> BlobRef {
        BlobRef::parse(url).unwrap()
    }

    fn read_capability(key: &str, source: &BlobRef, now: DateTime<Utc>) -> Url {
        sign(key, source, SasPermissions::read_only(), now + TimeDelta::minutes(5)).unwrap()
    }

    #[test]
    fn signed_url_verifies() {
        let key = generate_key();
        let source = blob("http://127.0.0.1:10000/devacct/media/a.png");
        let now = Utc::now();

        let url = read_capability(&key, &source, now);
        let (granted, permissions) = verify(&key, &url, now).unwrap();

        assert_eq!(granted, source);
        assert!(permissions.read);
        assert!(!permissions.write);
        assert!(url.as_str().starts_with(source.url().as_str()));
    }

    #[test]
    fn expired_capability_is_rejected() {
        let key = generate_key();
        let source = blob("http://127.0.0.1:10000/devacct/media/a.png");
        let now = Utc::now();

        let url = read_capability(&key, &source, now);
        let err = verify(&key, &url, now + TimeDelta::minutes(6)).unwrap_err();

        assert!(matches!(err, StorageError::AuthorizationFailed(msg) if msg.contains("expired")));
    }

    #[test]
    fn capability_is_bound_to_blob_key_and_permissions() {
        let key = generate_key();
        let source = blob("http://127.0.0.1:10000/devacct/media/a.png");
        let now = Utc::now();
        let url = read_capability(&key, &source, now);

        let mut other_blob = url.clone();
        other_blob.set_path("/devacct/media/b.png");
        assert!(verify(&key, &other_blob, now).is_err());

        assert!(verify(&generate_key(), &url, now).is_err());

        let widened = Url::parse(&url.as_str().replace("sp=r", "sp=rw")).unwrap();
        assert!(verify(&key, &widened, now).is_err());

        let mut unsigned = url.clone();
        unsigned.set_query(None);
        assert!(matches!(
            verify(&key, &unsigned, now),
            Err(StorageError::AuthorizationFailed(_))
        ));
    }
}
