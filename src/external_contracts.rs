//! External Contracts (§6): the read surface an external reverse proxy
//! consumes. The core does not run a proxy process — it only guarantees
//! that, for every DEPLOYED deployment, `(subdomain, containerPort)` is
//! resolvable here.

use crate::db::EntityStore;
use crate::error::CoreError;

/// Resolves `subdomain` to the host port of its currently-DEPLOYED
/// deployment, if any. The proxy is expected to route to
/// `127.0.0.1:<port>` (loopback, since containers publish onto the host's
/// loopback interface — see `ResourceLimits`/`replace_and_run`).
pub async fn resolve_subdomain(store: &EntityStore, subdomain: &str) -> Result<Option<u16>, CoreError> {
    store.resolve_subdomain(subdomain).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn test_store() -> EntityStore {
        let dir = std::env::temp_dir().join(format!("dropdeploy-contracts-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        EntityStore::new(crate::db::init(&dir).await.unwrap())
    }

    #[tokio::test]
    async fn unresolved_subdomain_returns_none() {
        let store = test_store().await;
        assert_eq!(resolve_subdomain(&store, "nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn deployed_subdomain_resolves_to_its_port() {
        let store = test_store().await;
        let project = store
            .create_project("u1", "site", "site", "https://x.test/r.git", "STATIC", "main")
            .await
            .unwrap();
        let deployment = store.create_deployment(&project.id).await.unwrap();
        store.mark_deployed(&deployment.id, 8321, "site").await.unwrap();

        assert_eq!(resolve_subdomain(&store, "site").await.unwrap(), Some(8321));
    }
}
