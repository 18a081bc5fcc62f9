//! Merged tool catalog on the client side.
//!
//! Each server's tools are kept as their own table, ranked by the order in
//! which the servers were configured. A tool id offered by several servers
//! resolves to the lowest-ranked server; if that server goes away, the next
//! one's copy becomes visible without a rediscovery.

use std::collections::HashSet;

use super::protocol::{ServerInfo, Tool};

/// A tool together with the server that owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    /// The tool definition
    pub tool: Tool,
    /// URL of the owning server
    pub server: String,
}

#[derive(Debug, Clone)]
struct ServerTools {
    server: String,
    rank: usize,
    info: Option<ServerInfo>,
    tools: Vec<Tool>,
}

/// Tools discovered across all connected servers.
#[derive(Debug, Default)]
pub struct Catalog {
    servers: Vec<ServerTools>,
}

impl Catalog {
    /// Create a new empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tool table of one server.
    pub fn set_server_tools(&mut self, server: &str, rank: usize, info: Option<ServerInfo>, tools: Vec<Tool>) {
        for tool in &tools {
            if let Some(owner) = self.owner_of(&tool.id).filter(|owner| *owner != server) {
                let owner_rank = self.rank_of(owner).unwrap_or(usize::MAX);
                if owner_rank < rank {
                    tracing::warn!(tool = %tool.id, server, owner, "Tool id already provided by another server, keeping the first");
                } else {
                    tracing::warn!(tool = %tool.id, server, shadowed = owner, "Tool id provided by several servers, preferring this one");
                }
            }
        }

        match self.servers.iter_mut().find(|s| s.server == server) {
            Some(entry) => {
                entry.rank = rank;
                entry.tools = tools;
                if info.is_some() {
                    entry.info = info;
                }
            }
            None => self.servers.push(ServerTools { server: server.to_string(), rank, info, tools }),
        }
        self.servers.sort_by_key(|s| s.rank);
    }

    /// Drop every tool of a server. Returns how many were removed.
    pub fn remove_server(&mut self, server: &str) -> usize {
        let mut removed = 0;
        self.servers.retain(|s| {
            if s.server == server {
                removed = s.tools.len();
                false
            } else {
                true
            }
        });
        removed
    }

    /// Resolve a tool id to its entry.
    pub fn resolve(&self, tool_id: &str) -> Option<CatalogEntry> {
        self.servers.iter().find_map(|s| {
            s.tools
                .iter()
                .find(|t| t.id == tool_id)
                .map(|t| CatalogEntry { tool: t.clone(), server: s.server.clone() })
        })
    }

    /// Get the URL of the server that owns a tool id.
    pub fn owner_of(&self, tool_id: &str) -> Option<&str> {
        self.servers
            .iter()
            .find(|s| s.tools.iter().any(|t| t.id == tool_id))
            .map(|s| s.server.as_str())
    }

    /// Check if a tool id is known.
    pub fn contains(&self, tool_id: &str) -> bool {
        self.owner_of(tool_id).is_some()
    }

    /// All visible tools, in server rank then server order, without shadowed duplicates.
    pub fn entries(&self) -> Vec<CatalogEntry> {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for s in &self.servers {
            for tool in &s.tools {
                if seen.insert(tool.id.as_str()) {
                    entries.push(CatalogEntry { tool: tool.clone(), server: s.server.clone() });
                }
            }
        }
        entries
    }

    /// Get the server description recorded at discovery.
    pub fn server_info(&self, server: &str) -> Option<&ServerInfo> {
        self.servers.iter().find(|s| s.server == server).and_then(|s| s.info.as_ref())
    }

    /// Get the number of visible tools.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Check if the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.servers.iter().all(|s| s.tools.is_empty())
    }

    /// Remove everything.
    pub fn clear(&mut self) {
        self.servers.clear();
    }

    fn rank_of(&self, server: &str) -> Option<usize> {
        self.servers.iter().find(|s| s.server == server).map(|s| s.rank)
    }
}
