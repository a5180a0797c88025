use opmd_types::{Error, Result};

/// The collective surface the core needs from a parallel runtime.
///
/// Real deployments back this with an MPI communicator; serial runs use
/// [`LocalCommunicator`]. All methods are collective: every rank of the
/// communicator must call them in the same order.
pub trait Communicator {
    fn rank(&self) -> u32;
    fn size(&self) -> u32;

    /// All-gather of one variable-length string per rank, indexed by rank.
    fn all_gather_strings(&self, this_rank: &str) -> Result<Vec<String>>;

    /// Gather to a single rank; `Some` on `root`, `None` elsewhere.
    fn gather_strings_to(&self, root: u32, this_rank: &str) -> Result<Option<Vec<String>>>;

    /// Broadcast bytes from `root`; `payload` must be `Some` on the root.
    fn broadcast_bytes(&self, root: u32, payload: Option<Vec<u8>>) -> Result<Vec<u8>>;
}

/// The one-rank communicator of a serial process.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalCommunicator;

impl Communicator for LocalCommunicator {
    fn rank(&self) -> u32 {
        0
    }

    fn size(&self) -> u32 {
        1
    }

    fn all_gather_strings(&self, this_rank: &str) -> Result<Vec<String>> {
        Ok(vec![this_rank.to_owned()])
    }

    fn gather_strings_to(&self, root: u32, this_rank: &str) -> Result<Option<Vec<String>>> {
        if root != 0 {
            return Err(Error::usage(format!(
                "rank {root} does not exist in a size-1 communicator"
            )));
        }
        Ok(Some(vec![this_rank.to_owned()]))
    }

    fn broadcast_bytes(&self, root: u32, payload: Option<Vec<u8>>) -> Result<Vec<u8>> {
        if root != 0 {
            return Err(Error::usage(format!(
                "rank {root} does not exist in a size-1 communicator"
            )));
        }
        payload.ok_or_else(|| Error::Internal("broadcast root carries no payload".to_owned()))
    }
}

/// Rank zero reads the file, everyone receives its bytes.
pub fn collective_file_read(path: &str, comm: &dyn Communicator) -> Result<String> {
    let payload = if comm.rank() == 0 {
        Some(std::fs::read(path).map_err(|err| {
            Error::Parse(format!("rank 0 failed reading '{path}': {err}"))
        })?)
    } else {
        None
    };
    let bytes = comm.broadcast_bytes(0, payload)?;
    String::from_utf8(bytes)
        .map_err(|err| Error::Parse(format!("'{path}' is not valid UTF-8: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn local_communicator_is_the_identity() {
        let comm = LocalCommunicator;
        assert_eq!(comm.all_gather_strings("me").unwrap(), vec!["me".to_owned()]);
        assert_eq!(
            comm.gather_strings_to(0, "me").unwrap(),
            Some(vec!["me".to_owned()])
        );
        assert!(comm.gather_strings_to(1, "me").is_err());
    }

    #[test]
    fn collective_read_serial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "content").unwrap();
        let read = collective_file_read(&file.path().display().to_string(), &LocalCommunicator).unwrap();
        assert_eq!(read, "content");
    }
}
