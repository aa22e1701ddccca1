//! Remote build servers and their credentials.

use serde::{Deserialize, Serialize};

use super::layout::PathStyle;

/// Operating system of a build host. Decides script dialect and path style.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum HostOs {
    #[default]
    Linux,
    Windows,
}

impl HostOs {
    pub fn path_style(&self) -> PathStyle {
        match self {
            HostOs::Linux => PathStyle::Posix,
            HostOs::Windows => PathStyle::Windows,
        }
    }

    /// The OS this process runs on.
    pub fn current() -> Self {
        if cfg!(windows) {
            HostOs::Windows
        } else {
            HostOs::Linux
        }
    }
}

fn default_port() -> u16 {
    22
}

/// One remote build server from the pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Server {
    /// Host name or IP address.
    pub address: String,

    /// Login user.
    pub user: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub os: HostOs,
}

impl Server {
    pub fn new(address: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            user: user.into(),
            port: default_port(),
            os: HostOs::Linux,
        }
    }

    pub fn with_os(mut self, os: HostOs) -> Self {
        self.os = os;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Identity used to share one cached password between targets.
    pub fn key(&self) -> String {
        format!("{}@{}:{}", self.user, self.address, self.port)
    }

    /// Credentials for this server with the password not yet filled in.
    pub fn credentials(&self) -> Credentials {
        Credentials {
            address: self.address.clone(),
            user: self.user.clone(),
            port: self.port,
            os: self.os,
            password: None,
        }
    }
}

impl std::fmt::Display for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

/// Login material for one server. The password is filled lazily and lives
/// only in memory for the duration of a run.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub address: String,
    pub user: String,
    pub port: u16,
    pub os: HostOs,
    pub password: Option<String>,
}

impl Credentials {
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Forget the password so the next attempt prompts again.
    pub fn clear_password(&mut self) {
        self.password = None;
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("address", &self.address)
            .field("user", &self.user)
            .field("port", &self.port)
            .field("os", &self.os)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
