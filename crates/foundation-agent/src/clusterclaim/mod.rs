//! ClusterClaim synchronization on the managed cluster
//!
//! Keeps the set of agent-owned claims equal to what the probe reports. A
//! second, optional set reflects user labels from the cluster's
//! ManagedClusterInfo into claims. Each set is selected by label so the
//! two never delete each other's claims.
//!
//! The syncer is driven from the managed cluster: every ClusterClaim event
//! collapses into one pass over the whole set. The hub is only consulted for
//! the label reflection, which is skipped while the info is unavailable.

mod probe;

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

pub use probe::ClaimProbe;

use foundation_common::controller::ERROR_REQUEUE;
use foundation_common::crd::{
    is_create_only, ClusterClaim, ManagedClusterInfo, CLAIM_PLATFORM, CLAIM_PRODUCT,
};
use foundation_common::metrics::{record_claim_write, ClaimOperation, ReconcileTimer};
use foundation_common::Error;

use crate::managed::ManagedClusterReader;
use probe::{new_claim, PLATFORM_OTHER, PRODUCT_OTHER};

/// Marks claims reflected from ManagedClusterInfo labels
pub const SPOKE_ONLY_LABEL: &str = "open-cluster-management.io/spoke-only";

/// Selects claims produced by the probe
const PROBE_CLAIM_SELECTOR: &str =
    "open-cluster-management.io/hub-managed,!open-cluster-management.io/spoke-only";

/// Selects claims reflected from labels
const LABEL_CLAIM_SELECTOR: &str =
    "open-cluster-management.io/hub-managed,open-cluster-management.io/spoke-only";

/// Labels the hub maintains itself, never reflected into claims
const INTERNAL_LABELS: &[&str] = &[
    "clusterID",
    "cloud",
    "vendor",
    "managed-by",
    "openshiftVersion",
];

/// Resync period for the claim set
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(60);

/// Most trigger events folded into one pass
const TRIGGER_BATCH: usize = 64;

/// Claim operations against the managed cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get a claim by name
    async fn get_claim(&self, name: &str) -> Result<Option<ClusterClaim>, Error>;

    /// Create a claim
    async fn create_claim(&self, claim: &ClusterClaim) -> Result<(), Error>;

    /// Replace a claim
    async fn replace_claim(&self, claim: &ClusterClaim) -> Result<(), Error>;

    /// Delete a claim by name
    async fn delete_claim(&self, name: &str) -> Result<(), Error>;

    /// List claims matching a label selector
    async fn list_claims(&self, selector: &str) -> Result<Vec<ClusterClaim>, Error>;
}

/// Managed-cluster client backed by kube-rs
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new client wrapper
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self) -> Api<ClusterClaim> {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_claim(&self, name: &str) -> Result<Option<ClusterClaim>, Error> {
        Ok(self.api().get_opt(name).await?)
    }

    async fn create_claim(&self, claim: &ClusterClaim) -> Result<(), Error> {
        self.api().create(&PostParams::default(), claim).await?;
        Ok(())
    }

    async fn replace_claim(&self, claim: &ClusterClaim) -> Result<(), Error> {
        self.api()
            .replace(&claim.name_any(), &PostParams::default(), claim)
            .await?;
        Ok(())
    }

    async fn delete_claim(&self, name: &str) -> Result<(), Error> {
        match self.api().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_claims(&self, selector: &str) -> Result<Vec<ClusterClaim>, Error> {
        Ok(self
            .api()
            .list(&ListParams::default().labels(selector))
            .await?
            .items)
    }
}

/// Source of the claims the cluster should advertise
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClaimSource: Send + Sync {
    /// Compute the desired claims
    async fn claims(&self) -> Result<Vec<ClusterClaim>, Error>;
}

#[async_trait]
impl ClaimSource for ClaimProbe {
    async fn claims(&self) -> Result<Vec<ClusterClaim>, Error> {
        ClaimProbe::claims(self).await
    }
}

/// The cluster's ManagedClusterInfo on the hub
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InfoSource: Send + Sync {
    /// Fetch the info; `None` until the hub has created it
    async fn info(&self) -> Result<Option<ManagedClusterInfo>, Error>;
}

/// Reads the info from the hub
pub struct HubInfoSource {
    api: Api<ManagedClusterInfo>,
    cluster_name: String,
}

impl HubInfoSource {
    /// Read `{cluster_name}/{cluster_name}` from the hub
    pub fn new(hub: Client, cluster_name: &str) -> Self {
        Self {
            api: Api::namespaced(hub, cluster_name),
            cluster_name: cluster_name.to_string(),
        }
    }
}

#[async_trait]
impl InfoSource for HubInfoSource {
    async fn info(&self) -> Result<Option<ManagedClusterInfo>, Error> {
        Ok(self.api.get_opt(&self.cluster_name).await?)
    }
}

/// Context for the claim syncer
pub struct Context {
    /// Managed-cluster claim client
    pub kube: Arc<dyn KubeClient>,
    /// Desired claims
    pub source: Arc<dyn ClaimSource>,
    /// Labels to reflect
    pub info: Arc<dyn InfoSource>,
    /// Reflect ManagedClusterInfo labels into claims
    pub sync_labels: bool,
}

impl Context {
    /// Create a context over the managed cluster and the hub
    pub fn new(
        managed: Client,
        hub: Client,
        cluster_name: &str,
        reader: Arc<dyn ManagedClusterReader>,
        sync_labels: bool,
    ) -> Self {
        Self {
            kube: Arc::new(KubeClientImpl::new(managed)),
            source: Arc::new(ClaimProbe::new(reader)),
            info: Arc::new(HubInfoSource::new(hub, cluster_name)),
            sync_labels,
        }
    }

    /// Create a context for testing with custom mock clients
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        source: Arc<dyn ClaimSource>,
        info: Arc<dyn InfoSource>,
        sync_labels: bool,
    ) -> Self {
        Self {
            kube,
            source,
            info,
            sync_labels,
        }
    }
}

/// One pass over both claim sets
///
/// Probe claims are synced first and independently of the hub.
pub async fn sync(ctx: &Context) -> Result<(), Error> {
    let desired = ctx.source.claims().await?;
    sync_claims(ctx.kube.as_ref(), &desired, PROBE_CLAIM_SELECTOR, true).await?;

    if !ctx.sync_labels {
        return Ok(());
    }
    let Some(info) = ctx.info.info().await? else {
        debug!("cluster info not found on the hub, label reflection skipped");
        return Ok(());
    };
    let reflected = label_claims(info.labels());
    sync_claims(ctx.kube.as_ref(), &reflected, LABEL_CLAIM_SELECTOR, false).await
}

/// Sync on every trigger batch and every resync period until `shutdown`
/// resolves or the triggers end
///
/// A failed pass is retried after a short delay.
pub async fn run(
    ctx: Arc<Context>,
    triggers: BoxStream<'static, ()>,
    shutdown: impl Future<Output = ()>,
) {
    let mut triggers = triggers.ready_chunks(TRIGGER_BATCH);
    let mut ticker = tokio::time::interval(RESYNC_INTERVAL);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
            batch = triggers.next() => {
                if batch.is_none() {
                    warn!("cluster claim trigger streams ended");
                    break;
                }
            }
        }
        let timer = ReconcileTimer::start("clusterclaim");
        let result = sync(&ctx).await;
        timer.finish(&result);
        if let Err(error) = result {
            warn!(%error, "cluster claim sync failed, will retry");
            ticker.reset_after(ERROR_REQUEUE);
        }
    }
    info!("cluster claim syncer stopped");
}

/// Create or update every desired claim, then delete selected claims that
/// are no longer desired. Deletion is skipped if any write failed.
async fn sync_claims(
    kube: &dyn KubeClient,
    desired: &[ClusterClaim],
    selector: &str,
    guarded: bool,
) -> Result<(), Error> {
    let mut errors = Vec::new();
    for claim in desired {
        if let Err(e) = create_or_update(kube, claim, guarded).await {
            errors.push(e.to_string());
        }
    }
    if !errors.is_empty() {
        return Err(Error::internal(errors.join("\n")));
    }

    let expected: HashSet<String> = desired.iter().map(ResourceExt::name_any).collect();
    for existing in kube.list_claims(selector).await? {
        let name = existing.name_any();
        if expected.contains(&name) {
            continue;
        }
        kube.delete_claim(&name).await?;
        record_claim_write(ClaimOperation::Delete);
        info!(claim = %name, "stale cluster claim deleted");
    }
    Ok(())
}

async fn create_or_update(
    kube: &dyn KubeClient,
    claim: &ClusterClaim,
    guarded: bool,
) -> Result<(), Error> {
    let name = claim.name_any();
    let Some(existing) = kube.get_claim(&name).await? else {
        kube.create_claim(claim)
            .await
            .map_err(|e| Error::internal(format!("unable to create ClusterClaim {name}: {e}")))?;
        record_claim_write(ClaimOperation::Create);
        info!(claim = %name, value = %claim.spec.value, "cluster claim created");
        return Ok(());
    };

    if existing.spec == claim.spec {
        return Ok(());
    }
    if guarded && !may_update(&existing, claim) {
        debug!(claim = %name, "cluster claim update skipped");
        return Ok(());
    }

    let mut updated = existing;
    updated.spec = claim.spec.clone();
    kube.replace_claim(&updated)
        .await
        .map_err(|e| Error::internal(format!("unable to update ClusterClaim {name}: {e}")))?;
    record_claim_write(ClaimOperation::Update);
    info!(claim = %name, value = %claim.spec.value, "cluster claim updated");
    Ok(())
}

/// Whether a probe claim may overwrite the live one
///
/// Create-only claims and claims with an empty live value are never
/// updated. Platform and product never regress to `Other`, which is what
/// detection reports transiently during upgrades.
fn may_update(old: &ClusterClaim, new: &ClusterClaim) -> bool {
    let name = new.name_any();
    if is_create_only(&name) || old.spec.value.is_empty() {
        return false;
    }
    match name.as_str() {
        CLAIM_PRODUCT => new.spec.value != PRODUCT_OTHER,
        CLAIM_PLATFORM => new.spec.value != PLATFORM_OTHER,
        _ => true,
    }
}

/// Claims reflected from ManagedClusterInfo labels
fn label_claims(labels: &BTreeMap<String, String>) -> Vec<ClusterClaim> {
    labels
        .iter()
        .filter(|(label, _)| {
            !INTERNAL_LABELS.contains(&label.as_str()) && !label.contains("open-cluster-management.io")
        })
        .filter(|(_, value)| !value.is_empty())
        .filter_map(|(label, value)| {
            let name = claim_name_for_label(label);
            if !is_dns1123_subdomain(&name) {
                debug!(label = %label, "label is not a valid claim name, skipping");
                return None;
            }
            let mut claim = new_claim(&name, value.clone());
            claim
                .labels_mut()
                .insert(SPOKE_ONLY_LABEL.to_string(), String::new());
            Some(claim)
        })
        .collect()
}

/// `aaa/bbb` becomes `bbb.aaa`; deeper paths use dots; `_` becomes `-`
fn claim_name_for_label(label: &str) -> String {
    let lower = label.to_lowercase();
    let parts: Vec<&str> = lower.split('/').collect();
    let name = match parts.as_slice() {
        [prefix, name] => format!("{name}.{prefix}"),
        _ => lower.replace('/', "."),
    };
    name.replace('_', "-")
}

fn is_dns1123_subdomain(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }
    name.split('.').all(|segment| {
        let bytes = segment.as_bytes();
        let alnum = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();
        match (bytes.first(), bytes.last()) {
            (Some(first), Some(last)) => {
                alnum(first) && alnum(last) && bytes.iter().all(|b| alnum(b) || *b == b'-')
            }
            _ => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use foundation_common::crd::{
        ClusterClaimSpec, ClusterInfoSpec, CLAIM_K8S_ID, CLAIM_KUBE_VERSION, HUB_MANAGED_LABEL,
    };
    use rstest::rstest;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Write {
        Create(String, String),
        Replace(String, String),
        Delete(String),
    }

    /// Records claim writes and serves gets from a fixed live set
    #[derive(Clone, Default)]
    struct WriteCapture(Arc<Mutex<Vec<Write>>>);

    impl WriteCapture {
        fn client(&self, live: Vec<ClusterClaim>) -> MockKubeClient {
            let mut kube = MockKubeClient::new();

            let by_name = live.clone();
            kube.expect_get_claim().returning(move |name| {
                Ok(by_name.iter().find(|c| c.name_any() == name).cloned())
            });

            let listed = live;
            kube.expect_list_claims().returning(move |selector| {
                let spoke_only = !selector.contains('!');
                Ok(listed
                    .iter()
                    .filter(|c| c.labels().contains_key(SPOKE_ONLY_LABEL) == spoke_only)
                    .cloned()
                    .collect())
            });

            let writes = self.0.clone();
            kube.expect_create_claim().returning(move |claim| {
                writes
                    .lock()
                    .expect("lock")
                    .push(Write::Create(claim.name_any(), claim.spec.value.clone()));
                Ok(())
            });
            let writes = self.0.clone();
            kube.expect_replace_claim().returning(move |claim| {
                writes
                    .lock()
                    .expect("lock")
                    .push(Write::Replace(claim.name_any(), claim.spec.value.clone()));
                Ok(())
            });
            let writes = self.0.clone();
            kube.expect_delete_claim().returning(move |name| {
                writes
                    .lock()
                    .expect("lock")
                    .push(Write::Delete(name.to_string()));
                Ok(())
            });
            kube
        }

        fn writes(&self) -> Vec<Write> {
            self.0.lock().expect("lock").clone()
        }
    }

    fn source(claims: Vec<ClusterClaim>) -> MockClaimSource {
        let mut source = MockClaimSource::new();
        source
            .expect_claims()
            .returning(move || Ok(claims.clone()));
        source
    }

    fn hub(info: Option<ManagedClusterInfo>) -> Arc<MockInfoSource> {
        let mut hub = MockInfoSource::new();
        hub.expect_info().returning(move || Ok(info.clone()));
        Arc::new(hub)
    }

    fn bare_claim(name: &str, value: &str) -> ClusterClaim {
        ClusterClaim::new(
            name,
            ClusterClaimSpec {
                value: value.to_string(),
            },
        )
    }

    fn info(labels: &[(&str, &str)]) -> ManagedClusterInfo {
        let mut info = ManagedClusterInfo::new("cluster1", ClusterInfoSpec::default());
        info.metadata.namespace = Some("cluster1".to_string());
        info.metadata.labels = Some(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        info
    }

    mod probe_claims {
        use super::*;

        /// Story: The live claim set converges on the probe output
        #[tokio::test]
        async fn story_live_set_converges() {
            let capture = WriteCapture::default();
            let live = vec![
                new_claim(CLAIM_KUBE_VERSION, "v1.29.0"),
                new_claim("region.open-cluster-management.io", "us-east-1"),
            ];
            let desired = vec![
                new_claim(CLAIM_KUBE_VERSION, "v1.30.1"),
                new_claim(CLAIM_K8S_ID, "uid-1"),
            ];
            let ctx = Context::for_testing(
                Arc::new(capture.client(live)),
                Arc::new(source(desired)),
                hub(None),
                false,
            );

            sync(&ctx).await.expect("sync");
            assert_eq!(
                capture.writes(),
                vec![
                    Write::Replace(CLAIM_KUBE_VERSION.into(), "v1.30.1".into()),
                    Write::Create(CLAIM_K8S_ID.into(), "uid-1".into()),
                    Write::Delete("region.open-cluster-management.io".into()),
                ]
            );
        }

        #[tokio::test]
        async fn unchanged_claims_are_not_written() {
            let capture = WriteCapture::default();
            let claims = vec![new_claim(CLAIM_KUBE_VERSION, "v1.30.1")];
            let ctx = Context::for_testing(
                Arc::new(capture.client(claims.clone())),
                Arc::new(source(claims)),
                hub(None),
                false,
            );
            sync(&ctx).await.expect("sync");
            assert!(capture.writes().is_empty());
        }

        #[tokio::test]
        async fn failed_write_skips_cleanup() {
            let mut kube = MockKubeClient::new();
            kube.expect_get_claim().returning(|_| Ok(None));
            kube.expect_create_claim()
                .returning(|_| Err(Error::internal("apiserver unavailable")));
            kube.expect_list_claims().never();
            kube.expect_delete_claim().never();

            let ctx = Context::for_testing(
                Arc::new(kube),
                Arc::new(source(vec![new_claim(CLAIM_KUBE_VERSION, "v1.30.1")])),
                hub(None),
                false,
            );
            let err = sync(&ctx).await.expect_err("write failed");
            assert!(err.to_string().contains("unable to create ClusterClaim"));
        }

        #[tokio::test]
        async fn probe_error_propagates() {
            let mut source = MockClaimSource::new();
            source
                .expect_claims()
                .returning(|| Err(Error::precondition("no nodes")));
            let ctx = Context::for_testing(
                Arc::new(MockKubeClient::new()),
                Arc::new(source),
                hub(None),
                false,
            );
            assert!(sync(&ctx).await.is_err());
        }

        /// Story: Claims are published before the hub has created the info
        #[tokio::test]
        async fn story_claims_sync_without_cluster_info() {
            let capture = WriteCapture::default();
            let mut spoke = new_claim("env", "prod");
            spoke
                .labels_mut()
                .insert(SPOKE_ONLY_LABEL.to_string(), String::new());
            let ctx = Context::for_testing(
                Arc::new(capture.client(vec![spoke])),
                Arc::new(source(vec![new_claim(CLAIM_KUBE_VERSION, "v1.30.1")])),
                hub(None),
                true,
            );

            sync(&ctx).await.expect("sync");
            assert_eq!(
                capture.writes(),
                vec![Write::Create(CLAIM_KUBE_VERSION.into(), "v1.30.1".into())]
            );
        }

        #[tokio::test]
        async fn unreachable_hub_does_not_block_probe_claims() {
            let capture = WriteCapture::default();
            let mut hub = MockInfoSource::new();
            hub.expect_info()
                .returning(|| Err(Error::internal("hub unreachable")));
            let ctx = Context::for_testing(
                Arc::new(capture.client(vec![])),
                Arc::new(source(vec![new_claim(CLAIM_KUBE_VERSION, "v1.30.1")])),
                Arc::new(hub),
                true,
            );

            assert!(sync(&ctx).await.is_err());
            assert_eq!(
                capture.writes(),
                vec![Write::Create(CLAIM_KUBE_VERSION.into(), "v1.30.1".into())]
            );
        }

        #[rstest]
        #[case(CLAIM_K8S_ID, "old", "new", false)]
        #[case(CLAIM_KUBE_VERSION, "", "v1.30.1", false)]
        #[case(CLAIM_PRODUCT, "EKS", "Other", false)]
        #[case(CLAIM_PLATFORM, "AWS", "Other", false)]
        #[case(CLAIM_PRODUCT, "Other", "EKS", true)]
        #[case(CLAIM_KUBE_VERSION, "v1.29.0", "v1.30.1", true)]
        fn update_guard(#[case] name: &str, #[case] old: &str, #[case] new: &str, #[case] allowed: bool) {
            assert_eq!(may_update(&bare_claim(name, old), &bare_claim(name, new)), allowed);
        }
    }

    mod driver {
        use super::*;

        /// Story: A burst of claim events folds into one pass after the
        /// initial sync, and the loop ends with its triggers
        #[tokio::test]
        async fn story_events_collapse_into_one_pass() {
            let mut source = MockClaimSource::new();
            source.expect_claims().times(2).returning(|| Ok(vec![]));
            let mut kube = MockKubeClient::new();
            kube.expect_list_claims().returning(|_| Ok(vec![]));
            let ctx = Arc::new(Context::for_testing(
                Arc::new(kube),
                Arc::new(source),
                hub(None),
                false,
            ));

            let triggers = futures::stream::iter(vec![(), (), ()]).boxed();
            run(ctx, triggers, std::future::pending()).await;
        }

        #[tokio::test]
        async fn stops_on_shutdown() {
            let ctx = Arc::new(Context::for_testing(
                Arc::new(MockKubeClient::new()),
                Arc::new(MockClaimSource::new()),
                hub(None),
                false,
            ));
            run(ctx, futures::stream::pending().boxed(), std::future::ready(())).await;
        }
    }

    mod label_reflection {
        use super::*;

        #[rstest]
        #[case("environment", "environment")]
        #[case("example.com/team", "team.example.com")]
        #[case("a/b/c", "a.b.c")]
        #[case("Cost_Center", "cost-center")]
        fn label_names_become_claim_names(#[case] label: &str, #[case] claim: &str) {
            assert_eq!(claim_name_for_label(label), claim);
        }

        #[rstest]
        #[case("team.example.com", true)]
        #[case("a-b.c", true)]
        #[case("-bad", false)]
        #[case("bad.", false)]
        #[case("has space", false)]
        #[case("", false)]
        fn subdomain_validation(#[case] name: &str, #[case] valid: bool) {
            assert_eq!(is_dns1123_subdomain(name), valid);
        }

        #[test]
        fn internal_and_empty_labels_are_skipped() {
            let labels = BTreeMap::from([
                ("cloud".to_string(), "Amazon".to_string()),
                ("vendor".to_string(), "OpenShift".to_string()),
                ("cluster.open-cluster-management.io/clusterset".to_string(), "default".to_string()),
                ("feature.open-cluster-management.io/addon-x".to_string(), "available".to_string()),
                ("empty".to_string(), String::new()),
                ("bad label!".to_string(), "x".to_string()),
                ("env".to_string(), "prod".to_string()),
            ]);
            let claims = label_claims(&labels);
            assert_eq!(claims.len(), 1);
            assert_eq!(claims[0].name_any(), "env");
            assert_eq!(claims[0].spec.value, "prod");
            assert!(claims[0].labels().contains_key(SPOKE_ONLY_LABEL));
            assert!(claims[0].labels().contains_key(HUB_MANAGED_LABEL));
        }

        /// Story: Labels on the info become spoke-only claims, stale ones are removed
        #[tokio::test]
        async fn story_labels_are_reflected() {
            let capture = WriteCapture::default();
            let mut stale = new_claim("old", "x");
            stale
                .labels_mut()
                .insert(SPOKE_ONLY_LABEL.to_string(), String::new());
            let ctx = Context::for_testing(
                Arc::new(capture.client(vec![stale])),
                Arc::new(source(vec![])),
                hub(Some(info(&[("env", "prod")]))),
                true,
            );

            sync(&ctx).await.expect("sync");
            assert_eq!(
                capture.writes(),
                vec![
                    Write::Create("env".into(), "prod".into()),
                    Write::Delete("old".into()),
                ]
            );
        }

        #[tokio::test]
        async fn reflection_disabled_leaves_label_claims_alone() {
            let capture = WriteCapture::default();
            let mut spoke = new_claim("env", "prod");
            spoke
                .labels_mut()
                .insert(SPOKE_ONLY_LABEL.to_string(), String::new());
            let ctx = Context::for_testing(
                Arc::new(capture.client(vec![spoke])),
                Arc::new(source(vec![])),
                hub(None),
                false,
            );
            sync(&ctx).await.expect("sync");
            assert!(capture.writes().is_empty());
        }
    }
}
