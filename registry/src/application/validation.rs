use std::sync::Arc;

use resources::{
    objects::application::{Application, Item},
    validation::{
        name_is_dns_label, validate_object_meta, validate_object_meta_update, ErrorList,
        FieldError,
    },
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::references::{Lookup, LookupError, ReferenceClients};
use crate::registry::{context::Interrupted, Context};

/// Application names must be at least this long.
pub const MIN_APPLICATION_NAME_LEN: usize = 32;
/// Item names must be at least this long.
pub const MIN_ITEM_NAME_LEN: usize = 2;

const ITEMS_FIELD: &str = "spec.items";

/// What to do when a referenced resource cannot be looked up
/// for a reason other than it being absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum BackendErrorPolicy {
    /// Log the failure and treat the reference as present.
    #[default]
    FailOpen,
    /// Reject the Application.
    FailClosed,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("item unsupported selected kind {0}")]
    UnsupportedKind(String),
    #[error("{}", .reasons.join(", "))]
    InvalidName { name: String, reasons: Vec<String> },
    #[error("resource {kind}={name} not found.")]
    NotFound { kind: String, name: String },
    #[error("failed to look up {kind}={name}: {cause}")]
    BackendUnavailable {
        kind: String,
        name: String,
        cause: String,
    },
    #[error("reference lookup cancelled")]
    Cancelled,
    #[error("reference lookup timed out")]
    Timeout,
}

impl From<Interrupted> for ReferenceError {
    fn from(interrupted: Interrupted) -> Self {
        match interrupted {
            Interrupted::Cancelled => ReferenceError::Cancelled,
            Interrupted::DeadlineExceeded => ReferenceError::Timeout,
        }
    }
}

/// Name rule for Applications: a DNS label of at least
/// [`MIN_APPLICATION_NAME_LEN`] characters.
pub fn validate_application_name(name: &str) -> Vec<String> {
    let reasons = name_is_dns_label(name);
    if !reasons.is_empty() {
        return reasons;
    }
    if name.chars().count() < MIN_APPLICATION_NAME_LEN {
        return vec![format!(
            "must be at least {} characters long",
            MIN_APPLICATION_NAME_LEN
        )];
    }
    Vec::new()
}

/// Checks kind and name of every item, stopping at the first bad one.
pub fn validate_item_kinds(items: &[Item]) -> Result<(), ReferenceError> {
    for item in items {
        if item.item_kind().is_none() {
            return Err(ReferenceError::UnsupportedKind(item.kind.clone()));
        }
        if item.name.chars().count() < MIN_ITEM_NAME_LEN {
            return Err(ReferenceError::InvalidName {
                name: item.name.clone(),
                reasons: vec![format!(
                    "item name must be at least {} characters long",
                    MIN_ITEM_NAME_LEN
                )],
            });
        }
        let reasons = name_is_dns_label(&item.name);
        if !reasons.is_empty() {
            return Err(ReferenceError::InvalidName {
                name: item.name.clone(),
                reasons,
            });
        }
    }
    Ok(())
}

/// Looks up every item, stopping at the first one that does not exist.
///
/// Items of unsupported kinds are skipped. Namespaced kinds are looked up in
/// `namespace`. How lookup failures other than not-found are handled
/// depends on `policy`.
pub async fn validate_item_existence(
    ctx: &Context,
    namespace: &str,
    items: &[Item],
    clients: &ReferenceClients,
    policy: BackendErrorPolicy,
) -> Result<(), ReferenceError> {
    for item in items {
        let kind = match item.item_kind() {
            Some(kind) => kind,
            None => {
                tracing::debug!("Skipping lookup of unsupported item {}", item);
                continue;
            },
        };
        let result = match clients.lookup(kind) {
            Lookup::Namespaced(getter) => ctx.run(getter.get(namespace, &item.name)).await?,
            Lookup::Cluster(getter) => ctx.run(getter.get(&item.name)).await?,
        };
        match result {
            Ok(()) => {},
            Err(LookupError::NotFound) => {
                return Err(ReferenceError::NotFound {
                    kind: item.kind.clone(),
                    name: item.name.clone(),
                })
            },
            Err(LookupError::Unavailable(cause)) => match policy {
                BackendErrorPolicy::FailOpen => {
                    tracing::warn!(
                        "Failed to look up {} in namespace {}, assuming it exists: {}",
                        item,
                        namespace,
                        cause
                    );
                },
                BackendErrorPolicy::FailClosed => {
                    return Err(ReferenceError::BackendUnavailable {
                        kind: item.kind.clone(),
                        name: item.name.clone(),
                        cause,
                    })
                },
            },
        }
    }
    Ok(())
}

fn items_value(items: &[Item]) -> String {
    items
        .iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Validation entry point for Applications.
#[derive(Clone)]
pub struct ApplicationValidator {
    clients: Arc<ReferenceClients>,
    policy: BackendErrorPolicy,
}

impl ApplicationValidator {
    pub fn new(clients: Arc<ReferenceClients>, policy: BackendErrorPolicy) -> Self {
        ApplicationValidator {
            clients,
            policy,
        }
    }

    /// Runs metadata, item and reference checks in that order and
    /// collects everything they report.
    pub async fn validate(&self, ctx: &Context, app: &Application) -> ErrorList {
        let mut errs = validate_object_meta(&app.metadata, true, validate_application_name);
        let items = &app.spec.items;

        if let Err(err) = validate_item_kinds(items) {
            errs.push(FieldError::invalid(
                ITEMS_FIELD,
                &items_value(items),
                &err.to_string(),
            ));
        }

        // a missing namespace is already reported above
        if app.metadata.namespace.is_empty() {
            return errs;
        }
        if let Err(err) = validate_item_existence(
            ctx,
            &app.metadata.namespace,
            items,
            &self.clients,
            self.policy,
        )
        .await
        {
            errs.push(FieldError::invalid(
                ITEMS_FIELD,
                &items_value(items),
                &err.to_string(),
            ));
        }
        errs
    }

    /// Update checks: immutable metadata and name legality.
    /// Items are not looked up again.
    pub fn validate_update(&self, app: &Application, old: &Application) -> ErrorList {
        let mut errs = validate_object_meta_update(&app.metadata, &old.metadata);
        errs.extend(validate_object_meta(
            &app.metadata,
            true,
            name_is_dns_label,
        ));
        errs
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use resources::objects::Metadata;

    use super::*;
    use crate::application::references::{ClusterGetter, NamespacedGetter};

    pub const APP_NAME: &str = "storefront-application-for-tests-001";

    /// Lookup double answering from a fixed table keyed by `namespace/name`
    /// (cluster-scoped lookups use an empty namespace).
    #[derive(Default)]
    pub struct FakeGetter {
        pub answers: HashMap<String, Result<(), LookupError>>,
        pub calls: AtomicUsize,
        pub hang: bool,
    }

    impl FakeGetter {
        pub fn with(entries: &[(&str, Result<(), LookupError>)]) -> Self {
            FakeGetter {
                answers: entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
                ..Default::default()
            }
        }

        async fn answer(&self, key: String) -> Result<(), LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.answers
                .get(&key)
                .cloned()
                .unwrap_or(Err(LookupError::NotFound))
        }
    }

    #[async_trait]
    impl NamespacedGetter for FakeGetter {
        async fn get(&self, namespace: &str, name: &str) -> Result<(), LookupError> {
            self.answer(format!("{}/{}", namespace, name)).await
        }
    }

    #[async_trait]
    impl ClusterGetter for FakeGetter {
        async fn get(&self, name: &str) -> Result<(), LookupError> {
            self.answer(format!("/{}", name)).await
        }
    }

    /// Clients where only `pods` and `nodes` know anything.
    pub fn fake_clients(
        pods: FakeGetter,
        nodes: FakeGetter,
    ) -> (ReferenceClients, Arc<FakeGetter>, Arc<FakeGetter>) {
        let pods = Arc::new(pods);
        let nodes = Arc::new(nodes);
        let mut clients = ReferenceClients::uniform(|_| FakeGetter::default());
        clients.pods = pods.clone() as Arc<dyn NamespacedGetter>;
        clients.nodes = nodes.clone() as Arc<dyn ClusterGetter>;
        (clients, pods, nodes)
    }

    pub fn application(namespace: &str, items: Vec<Item>) -> Application {
        let mut app = Application {
            metadata: Metadata::new(namespace, APP_NAME),
            ..Default::default()
        };
        app.spec.items = items;
        app
    }

    #[test]
    fn application_names() {
        assert!(validate_application_name(APP_NAME).is_empty());
        assert_eq!(
            validate_application_name("shop"),
            vec!["must be at least 32 characters long".to_string()]
        );
        // legality is checked before length
        let reasons = validate_application_name("Shop");
        assert!(!reasons.is_empty());
        assert!(!reasons[0].contains("at least"));
        assert!(!validate_application_name(&"a".repeat(64)).is_empty());

        let short = format!("shop-{}", "a".repeat(26));
        assert_eq!(short.len(), 31);
        assert_eq!(
            validate_application_name(&short),
            vec!["must be at least 32 characters long".to_string()]
        );
        assert!(validate_application_name(&format!("{}b", short)).is_empty());
    }

    #[test]
    fn item_kinds() {
        assert_eq!(validate_item_kinds(&[]), Ok(()));
        assert_eq!(
            validate_item_kinds(&[Item::new("Pod", "web-0"), Item::new("Node", "worker-1")]),
            Ok(())
        );

        let err = validate_item_kinds(&[Item::new("Pod", "web-0"), Item::new("Secret", "db")])
            .unwrap_err();
        assert_eq!(err.to_string(), "item unsupported selected kind Secret");

        let err = validate_item_kinds(&[Item::new("Service", "a")]).unwrap_err();
        assert_eq!(err.to_string(), "item name must be at least 2 characters long");

        let err = validate_item_kinds(&[Item::new("Service", "Web_0")]).unwrap_err();
        assert!(matches!(err, ReferenceError::InvalidName { .. }));

        // the first bad item wins
        let err = validate_item_kinds(&[Item::new("Pod", "x"), Item::new("Secret", "db")])
            .unwrap_err();
        assert_eq!(err.to_string(), "item name must be at least 2 characters long");
    }

    #[tokio::test]
    async fn existence_found_and_missing() {
        let (clients, pods, nodes) = fake_clients(
            FakeGetter::with(&[("dev/web-0", Ok(()))]),
            FakeGetter::with(&[("/worker-1", Ok(()))]),
        );
        let ctx = Context::new();
        let policy = BackendErrorPolicy::FailOpen;

        let items = [Item::new("Pod", "web-0"), Item::new("Node", "worker-1")];
        assert_eq!(
            validate_item_existence(&ctx, "dev", &items, &clients, policy).await,
            Ok(())
        );

        let items = [Item::new("Pod", "x"), Item::new("Node", "worker-1")];
        let err = validate_item_existence(&ctx, "dev", &items, &clients, policy)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "resource Pod=x not found.");
        assert_eq!(pods.calls.load(Ordering::SeqCst), 2);
        // stopped at the first missing item
        assert_eq!(nodes.calls.load(Ordering::SeqCst), 1);

        let items = [Item::new("Pod", "missing-a"), Item::new("Pod", "missing-b")];
        let err = validate_item_existence(&ctx, "dev", &items, &clients, policy)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "resource Pod=missing-a not found.");

        // pods are looked up in the application's namespace
        let items = [Item::new("Pod", "web-0")];
        assert!(validate_item_existence(&ctx, "prod", &items, &clients, policy)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn existence_skips_unsupported_kinds() {
        let (clients, ..) = fake_clients(FakeGetter::default(), FakeGetter::default());
        let items = [Item::new("Secret", "db")];
        assert_eq!(
            validate_item_existence(
                &Context::new(),
                "dev",
                &items,
                &clients,
                BackendErrorPolicy::FailClosed
            )
            .await,
            Ok(())
        );
    }

    #[tokio::test]
    async fn existence_backend_errors_follow_policy() {
        let unavailable = || {
            FakeGetter::with(&[(
                "dev/web-0",
                Err(LookupError::Unavailable("connection refused".to_string())),
            )])
        };
        let items = [Item::new("Pod", "web-0")];

        let (clients, ..) = fake_clients(unavailable(), FakeGetter::default());
        assert_eq!(
            validate_item_existence(
                &Context::new(),
                "dev",
                &items,
                &clients,
                BackendErrorPolicy::FailOpen
            )
            .await,
            Ok(())
        );

        let (clients, ..) = fake_clients(unavailable(), FakeGetter::default());
        let err = validate_item_existence(
            &Context::new(),
            "dev",
            &items,
            &clients,
            BackendErrorPolicy::FailClosed,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ReferenceError::BackendUnavailable { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn existence_honours_deadline() {
        let (clients, ..) = fake_clients(
            FakeGetter {
                hang: true,
                ..Default::default()
            },
            FakeGetter::default(),
        );
        let ctx = Context::new().timeout(Duration::from_millis(100));
        let items = [Item::new("Pod", "web-0")];
        assert_eq!(
            validate_item_existence(&ctx, "dev", &items, &clients, BackendErrorPolicy::FailOpen)
                .await,
            Err(ReferenceError::Timeout)
        );

        let ctx = Context::new();
        ctx.cancel();
        assert_eq!(
            validate_item_existence(&ctx, "dev", &items, &clients, BackendErrorPolicy::FailOpen)
                .await,
            Err(ReferenceError::Cancelled)
        );
    }

    #[tokio::test]
    async fn validate_collects_every_step() {
        let (clients, ..) = fake_clients(
            FakeGetter::with(&[("dev/web-0", Ok(()))]),
            FakeGetter::default(),
        );
        let validator =
            ApplicationValidator::new(Arc::new(clients), BackendErrorPolicy::FailOpen);
        let ctx = Context::new();

        let ok = application("dev", vec![Item::new("Pod", "web-0")]);
        assert!(validator.validate(&ctx, &ok).await.is_empty());

        let empty = application("dev", vec![]);
        assert!(validator.validate(&ctx, &empty).await.is_empty());

        let mut bad = application(
            "dev",
            vec![Item::new("Secret", "db"), Item::new("Pod", "web-1")],
        );
        bad.metadata.name = "shop".to_string();
        let errs = validator.validate(&ctx, &bad).await;
        let rendered: Vec<_> = errs.iter().map(|e| e.to_string()).collect();
        assert_eq!(errs.len(), 3, "{:?}", rendered);
        assert!(rendered[0].starts_with("metadata.name"));
        assert!(rendered[1].ends_with("item unsupported selected kind Secret"));
        assert!(rendered[2].ends_with("resource Pod=web-1 not found."));
    }

    #[tokio::test]
    async fn update_checks_skip_items() {
        let (clients, pods, _) = fake_clients(FakeGetter::default(), FakeGetter::default());
        let validator =
            ApplicationValidator::new(Arc::new(clients), BackendErrorPolicy::FailClosed);

        let old = application("dev", vec![Item::new("Pod", "web-0")]);
        let mut new = old.clone();
        new.spec.items.push(Item::new("Secret", "x"));
        assert!(validator.validate_update(&new, &old).is_empty());

        new.metadata.namespace = "prod".to_string();
        let errs = validator.validate_update(&new, &old);
        assert_eq!(errs.len(), 1);
        assert!(errs.to_string().contains("metadata.namespace"));
        assert_eq!(pods.calls.load(Ordering::SeqCst), 0);

        // short names are legal on update
        let mut renamed_old = old.clone();
        renamed_old.metadata.name = "shop".to_string();
        let renamed_new = renamed_old.clone();
        assert!(validator.validate_update(&renamed_new, &renamed_old).is_empty());
    }
}
