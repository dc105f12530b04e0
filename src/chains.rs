//! Chain tables
//!
//! Two independent mappings:
//! - [`DomainTable`]: network name <-> CCTP domain id, plus the RPC endpoint
//!   the relayer uses for that network. This is what the engine routes on.
//! - [`ChainIdTable`]: common EVM chain id -> network name. Only the API layer
//!   uses it, to accept `8453` as well as `base` in requests.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use eyre::{eyre, Result, WrapErr};

/// Which set of deployments the relayer talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }

    /// Default attestation service host for this network
    pub fn default_attestation_url(&self) -> &'static str {
        match self {
            Network::Mainnet => "https://iris-api.circle.com",
            Network::Testnet => "https://iris-api-sandbox.circle.com",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Network {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" | "sandbox" => Ok(Network::Testnet),
            other => Err(eyre!("Unknown network: {} (expected mainnet or testnet)", other)),
        }
    }
}

/// Built-in network rows: (name, domain, chain id, default RPC)
type ChainRow = (&'static str, u32, u64, &'static str);

const MAINNET_CHAINS: [ChainRow; 6] = [
    ("ethereum", 0, 1, "https://eth.llamarpc.com"),
    ("avalanche", 1, 43114, "https://api.avax.network/ext/bc/C/rpc"),
    ("optimism", 2, 10, "https://mainnet.optimism.io"),
    ("arbitrum", 3, 42161, "https://arb1.arbitrum.io/rpc"),
    ("base", 6, 8453, "https://mainnet.base.org"),
    ("polygon", 7, 137, "https://polygon-rpc.com"),
];

const TESTNET_CHAINS: [ChainRow; 6] = [
    ("ethereum", 0, 11155111, "https://ethereum-sepolia-rpc.publicnode.com"),
    ("avalanche", 1, 43113, "https://api.avax-test.network/ext/bc/C/rpc"),
    ("optimism", 2, 11155420, "https://sepolia.optimism.io"),
    ("arbitrum", 3, 421614, "https://sepolia-rollup.arbitrum.io/rpc"),
    ("base", 6, 84532, "https://sepolia.base.org"),
    ("polygon", 7, 80002, "https://rpc-amoy.polygon.technology"),
];

fn rows(network: Network) -> &'static [ChainRow; 6] {
    match network {
        Network::Mainnet => &MAINNET_CHAINS,
        Network::Testnet => &TESTNET_CHAINS,
    }
}

// ============================================================================
// Domain table
// ============================================================================

/// A network the relayer can route to or from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainEntry {
    /// Lowercase network name (e.g., "base")
    pub name: String,
    /// CCTP domain id (protocol numbering, not the EVM chain id)
    pub domain: u32,
    /// Expected EVM chain id, if known
    pub chain_id: Option<u64>,
    /// RPC endpoint for submitting completions on this network
    pub rpc_url: String,
}

/// Network name <-> CCTP domain id mapping
#[derive(Debug, Clone)]
pub struct DomainTable {
    entries: Vec<DomainEntry>,
    by_domain: HashMap<u32, usize>,
}

impl DomainTable {
    /// Create a table, rejecting duplicate names or domain ids
    pub fn new(entries: Vec<DomainEntry>) -> Result<Self> {
        let mut by_domain = HashMap::new();
        let mut seen_names = std::collections::HashSet::new();

        for (idx, entry) in entries.iter().enumerate() {
            if by_domain.insert(entry.domain, idx).is_some() {
                return Err(eyre!("Duplicate CCTP domain: {}", entry.domain));
            }
            if !seen_names.insert(entry.name.clone()) {
                return Err(eyre!("Duplicate network name: {}", entry.name));
            }
        }

        if entries.is_empty() {
            return Err(eyre!("At least one CCTP domain must be configured"));
        }

        Ok(Self { entries, by_domain })
    }

    /// Built-in six-network table for `network`
    pub fn defaults(network: Network) -> Self {
        let entries = rows(network)
            .iter()
            .map(|(name, domain, chain_id, rpc)| DomainEntry {
                name: name.to_string(),
                domain: *domain,
                chain_id: Some(*chain_id),
                rpc_url: rpc.to_string(),
            })
            .collect::<Vec<_>>();
        let by_domain = entries
            .iter()
            .enumerate()
            .map(|(idx, e)| (e.domain, idx))
            .collect();
        Self { entries, by_domain }
    }

    /// Look up the domain id for a network name (case-insensitive)
    pub fn domain_of(&self, name: &str) -> Option<u32> {
        let name = name.trim().to_lowercase();
        self.entries.iter().find(|e| e.name == name).map(|e| e.domain)
    }

    /// Look up a network by domain id
    pub fn get(&self, domain: u32) -> Option<&DomainEntry> {
        self.by_domain.get(&domain).map(|&idx| &self.entries[idx])
    }

    pub fn name_of(&self, domain: u32) -> Option<&str> {
        self.get(domain).map(|e| e.name.as_str())
    }

    pub fn contains(&self, domain: u32) -> bool {
        self.by_domain.contains_key(&domain)
    }

    pub fn entries(&self) -> impl Iterator<Item = &DomainEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse a `name=domain,name=domain` override string
pub fn parse_domain_overrides(raw: &str) -> Result<Vec<(String, u32)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (name, domain) = pair
                .split_once('=')
                .ok_or_else(|| eyre!("Expected name=domain, got '{}'", pair))?;
            let domain: u32 = domain
                .trim()
                .parse()
                .wrap_err_with(|| format!("Invalid domain id in '{}'", pair))?;
            Ok((name.trim().to_lowercase(), domain))
        })
        .collect()
}

/// Build the domain table from the environment
///
/// `CCTP_DOMAINS` replaces the built-in name/domain pairs; `<NAME>_RPC_URL`
/// overrides the RPC endpoint of any network.
pub fn load_domains_from_env(network: Network) -> Result<DomainTable> {
    let defaults = DomainTable::defaults(network);

    let pairs = match std::env::var("CCTP_DOMAINS") {
        Ok(raw) => parse_domain_overrides(&raw)?,
        Err(_) => defaults
            .entries()
            .map(|e| (e.name.clone(), e.domain))
            .collect(),
    };

    let mut entries = Vec::with_capacity(pairs.len());
    for (name, domain) in pairs {
        let known = defaults.entries().find(|e| e.name == name);
        let env_key = format!("{}_RPC_URL", name.to_uppercase());
        let rpc_url = match std::env::var(&env_key) {
            Ok(url) => url,
            Err(_) => known
                .map(|e| e.rpc_url.clone())
                .ok_or_else(|| eyre!("Missing {} for custom network {}", env_key, name))?,
        };

        entries.push(DomainEntry {
            chain_id: known.and_then(|e| e.chain_id),
            name,
            domain,
            rpc_url,
        });
    }

    DomainTable::new(entries)
}

// ============================================================================
// Chain id table
// ============================================================================

/// Common EVM chain id -> network name, used by the API layer only
#[derive(Debug, Clone)]
pub struct ChainIdTable {
    names: HashMap<u64, String>,
}

impl ChainIdTable {
    pub fn new(names: HashMap<u64, String>) -> Self {
        Self { names }
    }

    /// Built-in chain ids for `network`
    pub fn defaults(network: Network) -> Self {
        let names = rows(network)
            .iter()
            .map(|(name, _, chain_id, _)| (*chain_id, name.to_string()))
            .collect();
        Self { names }
    }

    /// Load from `CHAIN_IDS=1=ethereum,8453=base,...`, falling back to defaults
    pub fn load_from_env(network: Network) -> Result<Self> {
        let raw = match std::env::var("CHAIN_IDS") {
            Ok(raw) => raw,
            Err(_) => return Ok(Self::defaults(network)),
        };

        let mut names = HashMap::new();
        for pair in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (id, name) = pair
                .split_once('=')
                .ok_or_else(|| eyre!("Expected chainid=name, got '{}'", pair))?;
            let id: u64 = id
                .trim()
                .parse()
                .wrap_err_with(|| format!("Invalid chain id in '{}'", pair))?;
            names.insert(id, name.trim().to_lowercase());
        }
        Ok(Self { names })
    }

    pub fn name_of(&self, chain_id: u64) -> Option<&str> {
        self.names.get(&chain_id).map(String::as_str)
    }

    /// Interpret a request's chain identifier: a numeric chain id or a name
    pub fn resolve(&self, identifier: &str) -> String {
        let trimmed = identifier.trim();
        match trimmed.parse::<u64>() {
            Ok(id) => self
                .name_of(id)
                .map(str::to_string)
                .unwrap_or_else(|| trimmed.to_string()),
            Err(_) => trimmed.to_lowercase(),
        }
    }
}
