use tracing::debug;

use pulse_common::{IdentityLink, PulseError, Result};
use pulse_store::TouchpointStore;

/// Look up the donor behind a resolution key (refcode, click id, phone hash).
pub async fn resolve_donor<S>(store: &S, resolution_key: &str) -> Result<IdentityLink>
where
    S: TouchpointStore + ?Sized,
{
    let key = resolution_key.trim();
    if key.is_empty() {
        return Err(PulseError::InvalidRecord("empty resolution key".into()));
    }
    store
        .resolve_identity(key)
        .await?
        .ok_or_else(|| PulseError::Unlinkable(key.to_string()))
}

/// Like [`resolve_donor`], but a probabilistic link does not count.
pub async fn resolve_deterministic<S>(store: &S, resolution_key: &str) -> Result<IdentityLink>
where
    S: TouchpointStore + ?Sized,
{
    let link = resolve_donor(store, resolution_key).await?;
    if !link.method.is_deterministic() {
        debug!(resolution_key, "Only a probabilistic link exists");
        return Err(PulseError::Unlinkable(format!(
            "{resolution_key} is only probabilistically linked"
        )));
    }
    Ok(link)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pulse_common::LinkMethod;
    use pulse_store::MemoryStore;

    #[tokio::test]
    async fn unknown_key_is_unlinkable() {
        let store = MemoryStore::new();
        let err = resolve_donor(&store, "refcode:nope").await.unwrap_err();
        assert!(matches!(err, PulseError::Unlinkable(_)));
    }

    #[tokio::test]
    async fn probabilistic_link_is_not_deterministic() {
        let store = MemoryStore::new();
        store
            .link_identity(&IdentityLink {
                resolution_key: "phone:abc".into(),
                donor_identity: "donor-9".into(),
                method: LinkMethod::Probabilistic,
                linked_at: Utc::now(),
            })
            .await
            .unwrap();

        assert_eq!(
            resolve_donor(&store, "phone:abc").await.unwrap().donor_identity,
            "donor-9"
        );
        assert!(resolve_deterministic(&store, "phone:abc").await.is_err());
    }
}
