//! Process bootstrap configuration shared by every provisioner binary (§6
//! "Configuration flags", §10.3). Each binary's `clap::Parser` flattens this
//! struct in, mirroring the teacher's `#[clap(long, env)]` convention so
//! every flag is also settable via environment variable.

use std::path::PathBuf;

#[derive(Clone, Debug, clap::Parser)]
pub struct ProvisionerConfig {
    /// Namespace the provisioner itself runs in; used as the default
    /// install-namespace and for leader-election lease objects.
    #[clap(long, env, default_value = "rukpak-system")]
    pub system_namespace: String,

    /// Only Bundles/BundleDeployments whose `provisionerClassName` matches
    /// this are reconciled by this instance (§4.5 "a given instance serves
    /// exactly one provisioner ID").
    #[clap(long, env, default_value_t = rukpak_crd::PROVISIONER_PLAIN.to_string())]
    pub provisioner_class_name: String,

    /// Image used for the unpack workload's init + logs-exporter containers
    /// (§4.2 Image variant).
    #[clap(long, env)]
    pub unpack_image: String,

    /// Directory the local content store (§4.1) persists archives under.
    #[clap(long, env, default_value = "/var/cache/rukpak/bundles")]
    pub storage_dir: PathBuf,

    /// Directory the upload cache (§4.6) persists pending uploads under.
    #[clap(long, env, default_value = "/var/cache/rukpak/uploads")]
    pub upload_cache_dir: PathBuf,

    /// Address the HTTP serving layer binds to.
    #[clap(long, env, default_value = "0.0.0.0:8443")]
    pub http_bind_address: String,

    /// Externally reachable address other replicas / the `Bundle.status.contentURL`
    /// field should advertise for this process (§4.1).
    #[clap(long, env)]
    pub http_external_address: String,

    /// PEM-encoded CA bundle used when a non-leader process fetches content
    /// from the leader over HTTPS (§4.1).
    #[clap(long, env)]
    pub bundle_ca_file: Option<PathBuf>,

    /// Base URL of the upload ingestion service (§4.6, §9 "base-upload-manager-url");
    /// the unpacker's Upload variant reads from here when it isn't colocated
    /// with the process that received the upload.
    #[clap(long, env)]
    pub base_upload_manager_url: Option<String>,

    /// Address the health-probe HTTP endpoint binds to.
    #[clap(long, env, default_value = "0.0.0.0:8081")]
    pub health_probe_bind_address: String,

    /// Whether to participate in leader election (§5 "Leader election").
    /// Disabling this is only sensible for local/single-replica development.
    #[clap(long, env, default_value_t = true)]
    pub leader_elect: bool,

    /// Number of parallel reconcile workers per controller (§5 "Scheduling model").
    #[clap(long, env, default_value_t = 4)]
    pub max_concurrent_reconciles: usize,
}
