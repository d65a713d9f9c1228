//! Fixed filesystem layout shared by the boot and power paths.

/// Mount point of the persistent state device.
pub const STATE_DIR: &str = "/state";

/// Mount point of the optional OEM partition.
pub const OEM_DIR: &str = "/usr/share/quay/oem";

/// Transient mount point of the boot partition during kexec preparation.
pub const BOOT_MOUNT_DIR: &str = "/mnt/new_img";

/// Directory holding kernels and syslinux fragments on the boot partition.
pub const BOOT_DIR: &str = "boot";

/// Configuration shipped with the OS image.
pub const OS_CONFIG_FILE: &str = "/usr/share/quay/os-config.toml";

/// Local configuration, the target of `ConfigLoader::set`.
pub const LOCAL_CONFIG_FILE: &str = "/var/lib/quay/conf/quay.toml";

pub const VAR_QUAY_DIR: &str = "/var/lib/quay";

/// Where the init command line is saved for the configuration services.
pub const INIT_CMDLINE_FILE: &str = "/var/lib/quay/conf/init.cmdline";

pub const CLOUD_CONFIG_INIT_FILE: &str = "/var/lib/quay/conf/cloud-config.d/init.yml";
pub const CLOUD_CONFIG_BOOT_FILE: &str = "/var/lib/quay/conf/cloud-config.d/boot.yml";
pub const CLOUD_CONFIG_NETWORK_FILE: &str = "/var/lib/quay/conf/cloud-config.d/network.yml";
pub const META_DATA_FILE: &str = "/var/lib/quay/conf/metadata";

/// Engine API socket of the system container runtime.
pub const SYSTEM_DOCKER_SOCKET: &str = "/var/run/system-docker.sock";

/// Installed location of the quay multi-call binary.
pub const QUAY_BIN: &str = "/usr/bin/quay";

pub const SYSTEM_DOCKER_BIN: &str = "/usr/bin/system-docker";
pub const SYSTEM_DOCKER_LOG: &str = "/var/log/system-docker.log";

/// Configuration files that must survive the root switch.
pub fn boot_config_files() -> Vec<&'static str> {
    vec![
        CLOUD_CONFIG_INIT_FILE,
        CLOUD_CONFIG_BOOT_FILE,
        CLOUD_CONFIG_NETWORK_FILE,
        META_DATA_FILE,
    ]
}
