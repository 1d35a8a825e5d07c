//! Chain selection by network name, as the node reports it in `init`.

use strum_macros::{AsRefStr, Display, EnumString};

/// The networks a node can run on. An unrecognized name in `init` is
/// fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Network {
    Bitcoin,
    Testnet,
    Signet,
    Regtest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_node_names() {
        assert_eq!("bitcoin".parse::<Network>().unwrap(), Network::Bitcoin);
        assert_eq!("regtest".parse::<Network>().unwrap(), Network::Regtest);
        assert!("mainnet".parse::<Network>().is_err());
    }
}
