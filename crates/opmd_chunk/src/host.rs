use std::collections::BTreeMap;

use opmd_types::{Error, Result};

use crate::{Communicator, SourceId};

/// Locality metadata: rank → locality tag (typically the hostname).
pub type RankMeta = BTreeMap<SourceId, String>;

/// How a rank determines its own locality tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Hostname,
}

/// This process's locality tag.
pub fn by_method(method: Method) -> Result<String> {
    match method {
        Method::Hostname => hostname(),
    }
}

/// Collectively build the rank → tag map over a communicator.
pub fn by_method_collective(comm: &dyn Communicator, method: Method) -> Result<RankMeta> {
    let mine = by_method(method)?;
    let all = comm.all_gather_strings(&mine)?;
    Ok(all
        .into_iter()
        .enumerate()
        .map(|(rank, tag)| (rank as SourceId, tag))
        .collect())
}

/// The machine's hostname.
pub fn hostname() -> Result<String> {
    for var in ["HOSTNAME", "COMPUTERNAME"] {
        if let Ok(name) = std::env::var(var) {
            if !name.is_empty() {
                return Ok(name);
            }
        }
    }
    if let Ok(name) = std::fs::read_to_string("/proc/sys/kernel/hostname") {
        let name = name.trim();
        if !name.is_empty() {
            return Ok(name.to_owned());
        }
    }
    Err(Error::Internal("could not inquire hostname".to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LocalCommunicator;

    #[test]
    fn collective_meta_is_indexed_by_rank() {
        // guarantee a tag even on exotic build machines
        if hostname().is_err() {
            std::env::set_var("HOSTNAME", "testhost");
        }
        let meta = by_method_collective(&LocalCommunicator, Method::Hostname).unwrap();
        assert_eq!(meta.len(), 1);
        assert!(meta.contains_key(&0));
    }
}
