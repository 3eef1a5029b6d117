//! Shell commands executed inside node workloads.
//!
//! Each command renders to `["sh", "-c", <script>]`. Identity can only be
//! obtained from inside the node itself (the admin token never leaves the pod),
//! which is why everything goes through a shell script.

use crate::peer::NodeType;

/// File in the setup container that receives a `da` node's connection string.
pub const DA_CONNECTIONS_FILE: &str = "/tmp/celestia-config/TP-ADDR";
/// File holding a node's own trusted-peer address.
pub const TRUSTED_PEER_FILE: &str = "/tmp/TP-ADDR";
/// Env-var injection target for consensus nodes.
pub const CONSENSUS_ENV_FILE: &str = "/home/celestia/config/TP-ADDR";
/// Env-var injection target for `da` nodes.
pub const DA_ENV_FILE: &str = "/tmp/CONSENSUS_NODE_SERVICE";
/// Name of the trusted-peer list inside a group's trusted peers directory.
pub const TRUSTED_PEERS_LIST: &str = "TRUSTED_PEERS";
/// JSON-RPC endpoint of the node's admin API, reachable from inside the pod.
const NODE_RPC_URL: &str = "http://localhost:26658";

/// A command to run inside a workload container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    /// Ask the node for its own p2p identifier.
    PeerInfo,
    /// Print the workload's first non-loopback IPv4 address.
    NodeIp,
    /// Overwrite a file and echo it back.
    WriteFile { content: String, path: String },
    /// Static upstream injection for nodes that connect via env var.
    EnvVarFile { value: String, node_type: NodeType },
    /// Append an address to the trusted-peer list if it isn't there yet.
    AppendTrustedPeer { address: String, dir: String },
}

impl RemoteCommand {
    /// Write the assembled connection string of a `da` node.
    pub fn write_connections(content: impl Into<String>) -> Self {
        RemoteCommand::WriteFile {
            content: content.into(),
            path: DA_CONNECTIONS_FILE.to_string(),
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            RemoteCommand::PeerInfo => "peer-info",
            RemoteCommand::NodeIp => "node-ip",
            RemoteCommand::WriteFile { .. } => "write-file",
            RemoteCommand::EnvVarFile { .. } => "env-var-file",
            RemoteCommand::AppendTrustedPeer { .. } => "append-trusted-peer",
        }
    }

    /// Shell script for this command.
    pub fn script(&self) -> String {
        match self {
            RemoteCommand::PeerInfo => format!(
                r#"#!/bin/sh
# generate the token
export AUTHTOKEN=$(celestia bridge auth admin --node.store /home/celestia)

# keep only the token, the binary prints a warning line first
export AUTHTOKEN=$(echo $AUTHTOKEN|rev|cut -d' ' -f1|rev)

# make the request and parse the response
wget --header="Authorization: Bearer $AUTHTOKEN" \
   --header="Content-Type: application/json" \
   --post-data='{{"jsonrpc":"2.0","id":0,"method":"p2p.Info","params":[]}}' \
   --output-document - \
   {NODE_RPC_URL} | grep -o '"ID":"[^"]*"' | sed 's/"ID":"\([^"]*\)"/\1/'"#
            ),
            RemoteCommand::NodeIp => r#"#!/bin/sh
ip=$(ifconfig 2>/dev/null | grep -oE 'inet (addr:)?([0-9]+\.){3}[0-9]+' | grep -oE '([0-9]+\.){3}[0-9]+' | grep -v '^127\.' | head -n 1)
echo -n "${ip}""#
                .to_string(),
            RemoteCommand::WriteFile { content, path } => format!(
                r#"#!/bin/sh
mkdir -p "$(dirname "{path}")"
echo -n "{content}" > "{path}"
cat "{path}""#,
                content = shell_escape(content),
                path = shell_escape(path),
            ),
            RemoteCommand::EnvVarFile { value, node_type } => {
                let path = match node_type {
                    NodeType::Consensus => CONSENSUS_ENV_FILE,
                    NodeType::Da => DA_ENV_FILE,
                };
                format!(
                    r#"#!/bin/sh
echo -n "{value}" > "{path}""#,
                    value = shell_escape(value),
                )
            }
            RemoteCommand::AppendTrustedPeer { address, dir } => {
                let dir = dir.trim_end_matches('/');
                format!(
                    r#"#!/bin/sh
mkdir -p "{dir}"
if [ ! -f "{dir}/{TRUSTED_PEERS_LIST}" ]; then
  if [ -f "{TRUSTED_PEER_FILE}" ]; then
    cp "{TRUSTED_PEER_FILE}" "{dir}/{TRUSTED_PEERS_LIST}"
  else
    touch "{dir}/{TRUSTED_PEERS_LIST}"
  fi
fi
# only add the peer if it isn't in the list yet
grep -qF "{address}" "{dir}/{TRUSTED_PEERS_LIST}" || echo -n ",{address}" >> "{dir}/{TRUSTED_PEERS_LIST}"
cat "{dir}/{TRUSTED_PEERS_LIST}""#,
                    dir = shell_escape(dir),
                    address = shell_escape(address),
                )
            }
        }
    }

    /// Command tokens handed to the remote executor.
    pub fn argv(&self) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), self.script()]
    }
}

/// Escape characters that are special inside a double-quoted shell string.
fn shell_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argv_shape() {
        let argv = RemoteCommand::PeerInfo.argv();
        assert_eq!(argv.len(), 3);
        assert_eq!(argv[0], "sh");
        assert_eq!(argv[1], "-c");
        assert!(argv[2].contains("p2p.Info"));
        assert!(argv[2].contains(NODE_RPC_URL));
    }

    #[test]
    fn test_write_connections_targets_da_file() {
        let cmd = RemoteCommand::write_connections("/ip4/10.0.0.5/tcp/2121/p2p/abc");
        let script = cmd.script();

        assert!(script.contains(r#"echo -n "/ip4/10.0.0.5/tcp/2121/p2p/abc" > "/tmp/celestia-config/TP-ADDR""#));
        assert!(script.contains(r#"cat "/tmp/celestia-config/TP-ADDR""#));
    }

    #[test]
    fn test_env_var_file_by_node_type() {
        let consensus = RemoteCommand::EnvVarFile {
            value: "consensus-validator-1".into(),
            node_type: NodeType::Consensus,
        };
        assert!(consensus
            .script()
            .contains(r#"echo -n "consensus-validator-1" > "/home/celestia/config/TP-ADDR""#));

        let da = RemoteCommand::EnvVarFile {
            value: "consensus-full-1".into(),
            node_type: NodeType::Da,
        };
        assert!(da.script().contains(DA_ENV_FILE));
    }

    #[test]
    fn test_append_trusted_peer_is_idempotent_script() {
        let cmd = RemoteCommand::AppendTrustedPeer {
            address: "/dns/da-bridge-1/tcp/2121/p2p/abc".into(),
            dir: "/tmp/".into(),
        };
        let script = cmd.script();

        assert!(script.contains(r#"mkdir -p "/tmp""#));
        assert!(script.contains(
            r#"grep -qF "/dns/da-bridge-1/tcp/2121/p2p/abc" "/tmp/TRUSTED_PEERS" || echo -n ",/dns/da-bridge-1/tcp/2121/p2p/abc" >> "/tmp/TRUSTED_PEERS""#
        ));
    }

    #[test]
    fn test_shell_escape() {
        assert_eq!(shell_escape(r#"a"b$c`d\e"#), r#"a\"b\$c\`d\\e"#);
        assert_eq!(shell_escape("/ip4/1.2.3.4"), "/ip4/1.2.3.4");
    }

    #[test]
    fn test_names() {
        assert_eq!(RemoteCommand::PeerInfo.name(), "peer-info");
        assert_eq!(RemoteCommand::NodeIp.name(), "node-ip");
    }
}
