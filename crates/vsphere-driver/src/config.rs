//! Driver configuration

use std::time::Duration;

use clap::Args;

use vsphere_common::cache::{DEFAULT_CLIENT_CACHE_CAPACITY, DEFAULT_CLIENT_CACHE_TTL};
use vsphere_common::telemetry::LogFormat;
use vsphere_vmomi::{TemplateCloneConfig, DEFAULT_HARDWARE_VERSION};
use vsphere_vmop::backend::{DEFAULT_CREATE_TIMEOUT, DEFAULT_POLL_INTERVAL};
use vsphere_vmop::DeclarativeVmConfig;

/// Settings of the machine driver, flattened into the hosting binary's CLI
#[derive(Args, Clone, Debug, PartialEq, Eq)]
pub struct DriverConfig {
    /// Maximum number of cached supervisor cluster clients
    #[arg(
        long,
        env = "VSPHERE_CLIENT_CACHE_CAPACITY",
        default_value_t = DEFAULT_CLIENT_CACHE_CAPACITY
    )]
    pub client_cache_capacity: usize,

    /// Lifetime of a cached supervisor cluster client, in seconds
    #[arg(
        long,
        env = "VSPHERE_CLIENT_CACHE_TTL_SECS",
        default_value_t = DEFAULT_CLIENT_CACHE_TTL.as_secs()
    )]
    pub client_cache_ttl_secs: u64,

    /// Interval between readiness checks of a new declarative VM, in seconds
    #[arg(
        long,
        env = "VSPHERE_VM_POLL_INTERVAL_SECS",
        default_value_t = DEFAULT_POLL_INTERVAL.as_secs()
    )]
    pub vm_poll_interval_secs: u64,

    /// Time a new declarative VM may take to get an instance UUID, in seconds
    #[arg(
        long,
        env = "VSPHERE_VM_CREATE_TIMEOUT_SECS",
        default_value_t = DEFAULT_CREATE_TIMEOUT.as_secs()
    )]
    pub vm_create_timeout_secs: u64,

    /// Virtual hardware version cloned VMs are upgraded to (0 keeps the template's)
    #[arg(
        long,
        env = "VSPHERE_HARDWARE_VERSION",
        default_value_t = DEFAULT_HARDWARE_VERSION
    )]
    pub hardware_version: u32,

    /// Emit JSON logs
    #[arg(long, env = "VSPHERE_LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            client_cache_capacity: DEFAULT_CLIENT_CACHE_CAPACITY,
            client_cache_ttl_secs: DEFAULT_CLIENT_CACHE_TTL.as_secs(),
            vm_poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            vm_create_timeout_secs: DEFAULT_CREATE_TIMEOUT.as_secs(),
            hardware_version: DEFAULT_HARDWARE_VERSION,
            log_json: false,
        }
    }
}

impl DriverConfig {
    /// Lifetime of cached supervisor clients
    pub fn client_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.client_cache_ttl_secs)
    }

    /// Template-clone backend settings
    pub fn template_clone(&self) -> TemplateCloneConfig {
        TemplateCloneConfig {
            hardware_version: (self.hardware_version > 0).then_some(self.hardware_version),
        }
    }

    /// Declarative VM backend settings
    pub fn declarative_vm(&self) -> DeclarativeVmConfig {
        DeclarativeVmConfig {
            poll_interval: Duration::from_secs(self.vm_poll_interval_secs),
            create_timeout: Duration::from_secs(self.vm_create_timeout_secs),
        }
    }

    /// Log output format
    pub fn log_format(&self) -> LogFormat {
        if self.log_json {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        driver: DriverConfig,
    }

    #[test]
    fn defaults_match_backend_defaults() {
        let cli = Cli::try_parse_from(["provider"]).unwrap();
        assert_eq!(cli.driver, DriverConfig::default());
        assert_eq!(cli.driver.declarative_vm(), DeclarativeVmConfig::default());
        assert_eq!(cli.driver.template_clone(), TemplateCloneConfig::default());
        assert_eq!(cli.driver.client_cache_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "provider",
            "--vm-create-timeout-secs",
            "60",
            "--hardware-version",
            "0",
            "--log-json",
        ])
        .unwrap();
        assert_eq!(
            cli.driver.declarative_vm().create_timeout,
            Duration::from_secs(60)
        );
        assert_eq!(cli.driver.template_clone().hardware_version, None);
        assert_eq!(cli.driver.log_format(), LogFormat::Json);
    }
}
