use std::collections::HashMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VorteilError};

pub const DEFAULT_MTU: u32 = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privilege {
    Root,
    Superuser,
    User,
}

impl Default for Privilege {
    fn default() -> Self {
        Privilege::Root
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub binary: Option<String>,
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_cwd")]
    pub cwd: String,
    #[serde(default = "default_vtty")]
    pub stdout: String,
    #[serde(default = "default_vtty")]
    pub stderr: String,
    #[serde(default)]
    pub privilege: Privilege,
    #[serde(default)]
    pub strace: bool,
    #[serde(default)]
    pub logs: Vec<String>,
}

fn default_cwd() -> String {
    "/".to_string()
}

fn default_vtty() -> String {
    "/dev/vtty".to_string()
}

impl Program {
    pub fn validate(&self) -> Result<()> {
        if self.binary.is_none() && self.args.is_empty() {
            return Err(VorteilError::InvalidInput(
                "program must specify a binary or args".to_string(),
            ));
        }
        Ok(())
    }
}

pub const DHCP: &str = "dhcp";

/// Either the literal `"dhcp"` or a static IPv4 address, per spec §4.6
/// ("`ip=dhcp` ... otherwise all three must parse as IPv4").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkInterface {
    #[serde(default = "default_ip")]
    pub ip: String,
    pub mask: Option<String>,
    pub gateway: Option<String>,
    #[serde(default = "default_mtu")]
    pub mtu: u32,
    #[serde(default = "default_dns")]
    pub dns: Vec<String>,
    #[serde(default)]
    pub tcpdump: bool,
}

fn default_ip() -> String {
    DHCP.to_string()
}

fn default_mtu() -> u32 {
    DEFAULT_MTU
}

fn default_dns() -> Vec<String> {
    vec!["8.8.8.8".to_string()]
}

impl Default for NetworkInterface {
    fn default() -> Self {
        Self {
            ip: default_ip(),
            mask: None,
            gateway: None,
            mtu: DEFAULT_MTU,
            dns: default_dns(),
            tcpdump: false,
        }
    }
}

impl NetworkInterface {
    pub fn validate(&self) -> Result<()> {
        if self.ip == DHCP {
            if self.mask.is_some() || self.gateway.is_some() {
                return Err(VorteilError::InvalidInput(
                    "dhcp interfaces must not set mask or gateway".to_string(),
                ));
            }
            return Ok(());
        }

        self.ip.parse::<Ipv4Addr>().map_err(|_| {
            VorteilError::InvalidInput(format!("invalid ip: {}", self.ip))
        })?;
        let mask = self.mask.as_deref().ok_or_else(|| {
            VorteilError::InvalidInput("static interface missing mask".to_string())
        })?;
        let gateway = self.gateway.as_deref().ok_or_else(|| {
            VorteilError::InvalidInput("static interface missing gateway".to_string())
        })?;
        mask.parse::<Ipv4Addr>().map_err(|_| {
            VorteilError::InvalidInput(format!("invalid mask: {mask}"))
        })?;
        gateway.parse::<Ipv4Addr>().map_err(|_| {
            VorteilError::InvalidInput(format!("invalid gateway: {gateway}"))
        })?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NtpConfig {
    pub servers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub kernel_args: String,
    #[serde(default)]
    pub disk_size_delta: Option<u64>,
    #[serde(default)]
    pub inodes: Option<u64>,
    #[serde(default)]
    pub max_fds: u64,
    #[serde(default = "default_user")]
    pub user: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            hostname: None,
            kernel_args: String::new(),
            disk_size_delta: None,
            inodes: None,
            max_fds: 1024,
            user: default_user(),
        }
    }
}

fn default_user() -> String {
    "root".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VmConfig {
    #[serde(default)]
    pub shell: bool,
    #[serde(default)]
    pub ntp: Option<NtpConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub programs: Vec<Program>,
    #[serde(default)]
    pub network: Vec<NetworkInterface>,
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub vm: VmConfig,
}

impl AppConfig {
    /// Strict validation per spec §4.6 "Config validation".
    pub fn validate(&self) -> Result<()> {
        for program in &self.programs {
            program.validate()?;
        }
        for iface in &self.network {
            iface.validate()?;
        }
        if self.system.max_fds == 0 {
            return Ok(()); // 0 means "use default", applied by defaulting pass.
        }
        Ok(())
    }

    /// Apply the defaults spelled out in spec §4.6: MTU, IP mode, DNS,
    /// max FDs, user, program cwd/stdio/privilege.
    pub fn apply_defaults(&mut self) {
        if self.system.max_fds == 0 {
            self.system.max_fds = 1024;
        }
        if self.system.user.is_empty() {
            self.system.user = "root".to_string();
        }
        for program in &mut self.programs {
            if program.cwd.is_empty() {
                program.cwd = default_cwd();
            }
            if program.stdout.is_empty() {
                program.stdout = default_vtty();
            }
            if program.stderr.is_empty() {
                program.stderr = default_vtty();
            }
        }
        for iface in &mut self.network {
            if iface.mtu == 0 {
                iface.mtu = DEFAULT_MTU;
            }
            if iface.dns.is_empty() {
                iface.dns = default_dns();
            }
        }
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let mut cfg = AppConfig::default();
        cfg.apply_defaults();
        assert_eq!(cfg.system.max_fds, 1024);
        assert_eq!(cfg.system.user, "root");
    }

    #[test]
    fn dhcp_interface_rejects_mask() {
        let iface = NetworkInterface {
            ip: DHCP.to_string(),
            mask: Some("255.255.255.0".into()),
            gateway: None,
            mtu: DEFAULT_MTU,
            dns: default_dns(),
            tcpdump: false,
        };
        assert!(iface.validate().is_err());
    }

    #[test]
    fn static_interface_requires_valid_ipv4() {
        let iface = NetworkInterface {
            ip: "not-an-ip".into(),
            mask: Some("255.255.255.0".into()),
            gateway: Some("10.0.0.1".into()),
            mtu: DEFAULT_MTU,
            dns: default_dns(),
            tcpdump: false,
        };
        assert!(iface.validate().is_err());
    }

    #[test]
    fn static_interface_accepts_valid_ipv4_triple() {
        let iface = NetworkInterface {
            ip: "10.0.0.5".into(),
            mask: Some("255.255.255.0".into()),
            gateway: Some("10.0.0.1".into()),
            mtu: DEFAULT_MTU,
            dns: default_dns(),
            tcpdump: false,
        };
        assert!(iface.validate().is_ok());
    }

    #[test]
    fn program_requires_binary_or_args() {
        let program = Program {
            binary: None,
            args: vec![],
            env: HashMap::new(),
            cwd: default_cwd(),
            stdout: default_vtty(),
            stderr: default_vtty(),
            privilege: Privilege::Root,
            strace: false,
            logs: vec![],
        };
        assert!(program.validate().is_err());
    }
}
