//! Host link configuration.

use async_trait::async_trait;
use ovsnet_types::{IpPrefix, MacAddress};
use parking_lot::Mutex;
use std::collections::HashSet;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::shell::{self, shellquote, IP_CMD};

/// Operations on host network links used by the driver.
#[async_trait]
pub trait LinkConfig: Send + Sync {
    /// Brings a link administratively up.
    async fn set_link_up(&self, name: &str) -> Result<()>;

    /// Adds an address to a link and brings it up.
    async fn set_ip(&self, name: &str, address: &IpPrefix) -> Result<()>;

    /// Sets the hardware address of a link.
    async fn set_mac(&self, name: &str, mac: &MacAddress) -> Result<()>;

    /// Creates a veth pair `name` <-> `peer`.
    async fn create_veth_pair(&self, name: &str, peer: &str) -> Result<()>;

    /// Deletes a veth pair. Removing one end removes the other.
    async fn delete_veth_pair(&self, name: &str, peer: &str) -> Result<()>;

    /// Returns true if a link with this name exists.
    async fn link_exists(&self, name: &str) -> Result<bool>;
}

/// [`LinkConfig`] backed by the `ip` command.
///
/// In mock mode commands are recorded instead of executed, and only the
/// names registered through [`with_existing_links`](Self::with_existing_links)
/// exist.
#[derive(Debug, Default)]
pub struct IpCommandLink {
    mock_mode: bool,
    captured_commands: Mutex<Vec<String>>,
    existing: Mutex<HashSet<String>>,
}

impl IpCommandLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables mock mode for testing and dry runs
    pub fn with_mock_mode(mut self) -> Self {
        self.mock_mode = true;
        self
    }

    /// Marks links as present (mock mode only)
    pub fn with_existing_links<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.existing.lock().extend(names.into_iter().map(Into::into));
        self
    }

    /// Gets captured commands (for testing)
    pub fn captured_commands(&self) -> Vec<String> {
        self.captured_commands.lock().clone()
    }

    async fn exec(&self, cmd: String) -> Result<()> {
        if self.mock_mode {
            debug!(command = %cmd, "Mock mode: capturing command");
            self.captured_commands.lock().push(cmd);
            return Ok(());
        }
        shell::exec_or_fail(&cmd).await.map(|_| ())
    }
}

#[async_trait]
impl LinkConfig for IpCommandLink {
    #[instrument(skip(self))]
    async fn set_link_up(&self, name: &str) -> Result<()> {
        self.exec(format!("{} link set dev {} up", IP_CMD, shellquote(name)))
            .await
    }

    #[instrument(skip(self))]
    async fn set_ip(&self, name: &str, address: &IpPrefix) -> Result<()> {
        self.exec(format!(
            "{} address add {} dev {}",
            IP_CMD,
            shellquote(&address.to_string()),
            shellquote(name)
        ))
        .await?;
        self.set_link_up(name).await
    }

    #[instrument(skip(self))]
    async fn set_mac(&self, name: &str, mac: &MacAddress) -> Result<()> {
        self.exec(format!(
            "{} link set dev {} address {}",
            IP_CMD,
            shellquote(name),
            shellquote(&mac.to_string())
        ))
        .await
    }

    #[instrument(skip(self))]
    async fn create_veth_pair(&self, name: &str, peer: &str) -> Result<()> {
        self.exec(format!(
            "{} link add {} type veth peer name {}",
            IP_CMD,
            shellquote(name),
            shellquote(peer)
        ))
        .await?;
        if self.mock_mode {
            let mut existing = self.existing.lock();
            existing.insert(name.to_string());
            existing.insert(peer.to_string());
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_veth_pair(&self, name: &str, peer: &str) -> Result<()> {
        if !self.link_exists(name).await? {
            debug!(name, peer, "Veth pair already gone");
            return Ok(());
        }
        self.exec(format!("{} link del {}", IP_CMD, shellquote(name)))
            .await?;
        if self.mock_mode {
            let mut existing = self.existing.lock();
            existing.remove(name);
            existing.remove(peer);
        }
        Ok(())
    }

    async fn link_exists(&self, name: &str) -> Result<bool> {
        if self.mock_mode {
            return Ok(self.existing.lock().contains(name));
        }
        let cmd = format!("{} link show dev {}", IP_CMD, shellquote(name));
        Ok(shell::exec(&cmd).await?.success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_set_link_up_command() {
        let link = IpCommandLink::new().with_mock_mode();
        link.set_link_up("vport1a2b3c4").await.unwrap();
        assert_eq!(
            link.captured_commands(),
            vec![r#"/sbin/ip link set dev "vport1a2b3c4" up"#.to_string()]
        );
    }

    #[tokio::test]
    async fn test_set_ip_and_mac_commands() {
        let link = IpCommandLink::new().with_mock_mode();
        let addr: IpPrefix = "10.0.0.5/24".parse().unwrap();
        let mac: MacAddress = "02:42:0a:00:00:05".parse().unwrap();

        link.set_ip("port1", &addr).await.unwrap();
        link.set_mac("port1", &mac).await.unwrap();

        let cmds = link.captured_commands();
        assert_eq!(cmds.len(), 3);
        assert_eq!(cmds[0], r#"/sbin/ip address add "10.0.0.5/24" dev "port1""#);
        assert_eq!(cmds[1], r#"/sbin/ip link set dev "port1" up"#);
        assert_eq!(
            cmds[2],
            r#"/sbin/ip link set dev "port1" address "02:42:0a:00:00:05""#
        );
    }

    #[tokio::test]
    async fn test_veth_pair_lifecycle() {
        let link = IpCommandLink::new().with_mock_mode();
        link.create_veth_pair("port1", "vport1").await.unwrap();
        assert!(link.link_exists("port1").await.unwrap());
        assert!(link.link_exists("vport1").await.unwrap());

        link.delete_veth_pair("port1", "vport1").await.unwrap();
        assert!(!link.link_exists("vport1").await.unwrap());

        // second delete is a no-op
        link.delete_veth_pair("port1", "vport1").await.unwrap();
        let cmds = link.captured_commands();
        assert_eq!(cmds.len(), 2);
        assert_eq!(
            cmds[0],
            r#"/sbin/ip link add "port1" type veth peer name "vport1""#
        );
        assert_eq!(cmds[1], r#"/sbin/ip link del "port1""#);
    }

    #[tokio::test]
    async fn test_existing_links() {
        let link = IpCommandLink::new()
            .with_mock_mode()
            .with_existing_links(["port0000000"]);
        assert!(link.link_exists("port0000000").await.unwrap());
        assert!(!link.link_exists("port1111111").await.unwrap());
    }
}
