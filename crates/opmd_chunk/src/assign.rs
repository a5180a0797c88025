use std::collections::BTreeMap;

use itertools::Itertools as _;

use opmd_types::{Error, Extent, Result};

use crate::{intersection, BlockSlicer, ChunkInfo, ChunkTable, RankMeta, SourceId, WrittenChunkInfo};

/// Intermediate state while a multi-pass assignment is in flight.
///
/// `assigned` chunks carry the *reader* rank in their `source_id`;
/// `not_assigned` chunks still carry the writer rank.
#[derive(Debug, Clone, Default)]
pub struct PartialAssignment {
    pub not_assigned: ChunkTable,
    pub assigned: ChunkTable,
}

impl From<ChunkTable> for PartialAssignment {
    fn from(not_assigned: ChunkTable) -> Self {
        Self {
            not_assigned,
            assigned: ChunkTable::new(),
        }
    }
}

/// A total assignment pass: afterwards, no chunk is left unassigned.
pub trait Strategy {
    fn assign(
        &mut self,
        partial: PartialAssignment,
        rank_in: &RankMeta,
        rank_out: &RankMeta,
    ) -> Result<ChunkTable>;

    /// Convenience entry point for a fresh table.
    fn assign_table(
        &mut self,
        table: ChunkTable,
        rank_in: &RankMeta,
        rank_out: &RankMeta,
    ) -> Result<ChunkTable> {
        if rank_out.is_empty() {
            return Err(Error::usage("chunk assignment: no output ranks defined"));
        }
        self.assign(PartialAssignment::from(table), rank_in, rank_out)
    }
}

/// An assignment pass that may leave chunks unassigned for a later pass.
pub trait PartialStrategy {
    fn assign(
        &mut self,
        partial: PartialAssignment,
        rank_in: &RankMeta,
        rank_out: &RankMeta,
    ) -> Result<PartialAssignment>;
}

/// Distribute chunks to readers in rotating order.
///
/// Deterministic given the input iteration order and the (sorted) reader
/// set.
#[derive(Debug, Default)]
pub struct RoundRobin;

impl Strategy for RoundRobin {
    fn assign(
        &mut self,
        partial: PartialAssignment,
        _rank_in: &RankMeta,
        rank_out: &RankMeta,
    ) -> Result<ChunkTable> {
        if rank_out.is_empty() {
            return Err(Error::usage("cannot round-robin to zero ranks"));
        }
        let PartialAssignment {
            not_assigned,
            mut assigned,
        } = partial;
        let mut readers = rank_out.keys().copied().cycle();
        for mut chunk in not_assigned {
            chunk.source_id = readers.next().expect("cycle over a non-empty set");
            assigned.push(chunk);
        }
        Ok(assigned)
    }
}

/// Group chunks by the hostname of their writer; where a reader shares the
/// host, delegate to `within_node` restricted to those readers, otherwise
/// leave the chunks for a later pass.
pub struct ByHostname {
    within_node: Box<dyn Strategy>,
}

impl ByHostname {
    pub fn new(within_node: impl Strategy + 'static) -> Self {
        Self {
            within_node: Box::new(within_node),
        }
    }
}

impl PartialStrategy for ByHostname {
    fn assign(
        &mut self,
        partial: PartialAssignment,
        rank_in: &RankMeta,
        rank_out: &RankMeta,
    ) -> Result<PartialAssignment> {
        let PartialAssignment {
            not_assigned,
            mut assigned,
        } = partial;

        // collect chunks by writer hostname; chunks from unknown writers
        // stay unassigned
        let (known, mut leftover): (ChunkTable, ChunkTable) = not_assigned
            .into_iter()
            .partition(|chunk| rank_in.contains_key(&chunk.source_id));
        let chunk_groups = known
            .into_iter()
            .map(|chunk| (rank_in[&chunk.source_id].as_str(), chunk))
            .into_group_map();

        let readers_per_host = ranks_per_host(rank_out);
        for (hostname, chunks) in chunk_groups
            .into_iter()
            .sorted_by(|left, right| left.0.cmp(right.0))
        {
            match readers_per_host.get(hostname).filter(|ranks| !ranks.is_empty()) {
                None => {
                    // no reader on this host, back to the unassigned set
                    leftover.extend(chunks);
                }
                Some(ranks) => {
                    let ranks_on_target_node: RankMeta = ranks
                        .iter()
                        .map(|&rank| (rank, hostname.to_owned()))
                        .collect();
                    assigned = self.within_node.assign(
                        PartialAssignment {
                            not_assigned: chunks,
                            assigned,
                        },
                        rank_in,
                        &ranks_on_target_node,
                    )?;
                }
            }
        }

        Ok(PartialAssignment {
            not_assigned: leftover,
            assigned,
        })
    }
}

fn ranks_per_host(meta: &RankMeta) -> BTreeMap<&str, Vec<SourceId>> {
    let mut result: BTreeMap<&str, Vec<SourceId>> = BTreeMap::new();
    for (&rank, hostname) in meta {
        result.entry(hostname).or_default().push(rank);
    }
    result
}

/// Every reader independently keeps the intersections of all chunks with
/// its own slab of the total extent.
///
/// This strategy is *local*: the output only contains chunks for
/// `this_rank`, so each reader must run it itself.
pub struct ByCuboidSlice {
    slicer: Box<dyn BlockSlicer>,
    total_extent: Extent,
    this_rank: u32,
    comm_size: u32,
}

impl ByCuboidSlice {
    pub fn new(
        slicer: impl BlockSlicer + 'static,
        total_extent: Extent,
        this_rank: u32,
        comm_size: u32,
    ) -> Self {
        Self {
            slicer: Box::new(slicer),
            total_extent,
            this_rank,
            comm_size,
        }
    }
}

impl Strategy for ByCuboidSlice {
    fn assign(
        &mut self,
        partial: PartialAssignment,
        _rank_in: &RankMeta,
        _rank_out: &RankMeta,
    ) -> Result<ChunkTable> {
        let PartialAssignment {
            not_assigned,
            mut assigned,
        } = partial;

        let (offset, extent) =
            self.slicer
                .slice_block(&self.total_extent, self.comm_size, self.this_rank);
        let slab = ChunkInfo { offset, extent };

        for chunk in &not_assigned {
            if let Some(clipped) = intersection(&chunk.chunk, &slab) {
                assigned.push(WrittenChunkInfo {
                    chunk: clipped,
                    source_id: self.this_rank,
                });
            }
        }
        Ok(assigned)
    }
}

/// Greedy bin packing with a pre-splitting pass.
///
/// Chunks are sliced along `split_dim` into pieces of at most
/// `total volume / reader count` (single slices may exceed that when thin
/// enough slices do not exist), sorted by decreasing size and handed out
/// greedily in two passes. With finely splittable chunks this stays within
/// a factor two of the ideal per-reader volume.
#[derive(Debug)]
pub struct BinPacking {
    pub split_dim: usize,
}

impl Default for BinPacking {
    fn default() -> Self {
        Self { split_dim: 0 }
    }
}

impl Strategy for BinPacking {
    fn assign(
        &mut self,
        partial: PartialAssignment,
        _rank_in: &RankMeta,
        rank_out: &RankMeta,
    ) -> Result<ChunkTable> {
        if rank_out.is_empty() {
            return Err(Error::usage("cannot bin-pack to zero ranks"));
        }
        let PartialAssignment {
            not_assigned,
            mut assigned,
        } = partial;

        let total_volume: u64 = not_assigned.iter().map(|c| c.chunk.volume()).sum();
        let ideal_size = total_volume / rank_out.len() as u64;

        // Pieces may not be splittable below `ideal_size`; the greedy pass
        // still terminates, it only loses the approximation bound.
        let mut digestible = split_to_size_sorted(&not_assigned, ideal_size, self.split_dim);

        let worker = |digestible: &mut Vec<SizedChunk>, assigned: &mut ChunkTable| {
            for &dest_rank in rank_out.keys() {
                let mut leftover = ideal_size;
                let mut i = 0;
                while i < digestible.len() {
                    if digestible[i].size >= ideal_size {
                        // not splittable small enough; this chunk alone
                        // fills the rank for this pass
                        let mut entry = digestible.remove(i);
                        entry.chunk.source_id = dest_rank;
                        assigned.push(entry.chunk);
                        break;
                    } else if digestible[i].size <= leftover {
                        let mut entry = digestible.remove(i);
                        entry.chunk.source_id = dest_rank;
                        leftover -= entry.size;
                        assigned.push(entry.chunk);
                    } else {
                        i += 1;
                    }
                }
            }
        };

        // Each pass hands every rank at least half its ideal volume (while
        // chunks remain), so two passes empty the list.
        worker(&mut digestible, &mut assigned);
        worker(&mut digestible, &mut assigned);
        debug_assert!(digestible.is_empty());

        Ok(assigned)
    }
}

struct SizedChunk {
    chunk: WrittenChunkInfo,
    size: u64,
}

/// Slice chunks into hyperslabs of at most `max_size` elements along
/// `dim`, sorted by decreasing size.
///
/// Slabs of thickness 1 may still exceed `max_size`.
fn split_to_size_sorted(table: &ChunkTable, max_size: u64, dim: usize) -> Vec<SizedChunk> {
    let mut result = Vec::new();
    for chunk in table {
        let extent = &chunk.chunk.extent;
        let slice_size: u64 = extent
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != dim)
            .map(|(_, &e)| e)
            .product();
        if slice_size == 0 {
            log::warn!("chunk splitting encountered a zero-sized chunk, skipping it");
            continue;
        }

        // this many slices fit one piece before it exceeds max_size
        let streak = (max_size / slice_size).max(1);
        let sliced_extent = extent[dim];

        let mut position = 0;
        loop {
            let mut piece = chunk.clone();
            piece.chunk.offset[dim] += position;
            if position + streak >= sliced_extent {
                piece.chunk.extent[dim] = sliced_extent - position;
                let size = piece.chunk.extent[dim] * slice_size;
                result.push(SizedChunk { chunk: piece, size });
                break;
            }
            piece.chunk.extent[dim] = streak;
            result.push(SizedChunk {
                chunk: piece,
                size: streak * slice_size,
            });
            position += streak;
        }
    }
    result.sort_by(|left, right| right.size.cmp(&left.size));
    result
}

/// Run a partial pass, then a total pass over whatever it left behind.
pub struct FromPartial {
    first: Box<dyn PartialStrategy>,
    second: Box<dyn Strategy>,
}

impl FromPartial {
    pub fn new(first: impl PartialStrategy + 'static, second: impl Strategy + 'static) -> Self {
        Self {
            first: Box::new(first),
            second: Box::new(second),
        }
    }
}

impl Strategy for FromPartial {
    fn assign(
        &mut self,
        partial: PartialAssignment,
        rank_in: &RankMeta,
        rank_out: &RankMeta,
    ) -> Result<ChunkTable> {
        let intermediate = self.first.assign(partial, rank_in, rank_out)?;
        self.second.assign(intermediate, rank_in, rank_out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OneDimensionalBlockSlicer;
    use opmd_types::Offset;

    fn written(offset: &[u64], extent: &[u64], source_id: u32) -> WrittenChunkInfo {
        WrittenChunkInfo::new(Offset::from_slice(offset), Extent::from_slice(extent), source_id)
    }

    fn meta(hosts: &[(u32, &str)]) -> RankMeta {
        hosts.iter().map(|&(rank, host)| (rank, host.to_owned())).collect()
    }

    /// 1-D coverage histogram; counts how often each cell is assigned.
    fn coverage_1d(table: &ChunkTable, len: usize) -> Vec<u32> {
        let mut cells = vec![0; len];
        for chunk in table {
            let offset = chunk.chunk.offset[0] as usize;
            let extent = chunk.chunk.extent[0] as usize;
            for cell in &mut cells[offset..offset + extent] {
                *cell += 1;
            }
        }
        cells
    }

    #[test]
    fn round_robin_rotates_over_sorted_readers() {
        let table = vec![written(&[0], &[10], 0), written(&[10], &[10], 0), written(&[20], &[10], 0)];
        let readers = meta(&[(0, "hostA"), (1, "hostB")]);

        let assigned = RoundRobin.assign_table(table, &RankMeta::new(), &readers).unwrap();

        assert_eq!(assigned.len(), 3);
        assert_eq!(assigned[0].source_id, 0);
        assert_eq!(assigned[1].source_id, 1);
        assert_eq!(assigned[2].source_id, 0);
        similar_asserts::assert_eq!(coverage_1d(&assigned, 30), vec![1; 30]);
    }

    #[test]
    fn round_robin_refuses_zero_readers() {
        let err = RoundRobin
            .assign_table(vec![written(&[0], &[1], 0)], &RankMeta::new(), &RankMeta::new())
            .unwrap_err();
        assert!(matches!(err, Error::WrongApiUsage(_)));
    }

    #[test]
    fn by_hostname_keeps_chunks_node_local() {
        // writers 0, 1 on hostA; writer 2 on hostB
        let writers = meta(&[(0, "hostA"), (1, "hostA"), (2, "hostB")]);
        // reader 0 on hostB, reader 1 on hostA
        let readers = meta(&[(0, "hostB"), (1, "hostA")]);
        let table = vec![written(&[0], &[10], 0), written(&[10], &[10], 1), written(&[20], &[10], 2)];

        let assigned = FromPartial::new(ByHostname::new(RoundRobin), RoundRobin)
            .assign_table(table, &writers, &readers)
            .unwrap();

        assert_eq!(assigned.len(), 3);
        for chunk in &assigned {
            let writer_host = if chunk.chunk.offset[0] < 20 { "hostA" } else { "hostB" };
            assert_eq!(readers[&chunk.source_id], writer_host);
        }
        assert!(coverage_1d(&assigned, 30).iter().all(|&c| c == 1));
    }

    #[test]
    fn by_hostname_leaves_unmatched_hosts_for_the_second_pass() {
        let writers = meta(&[(0, "hostC")]);
        let readers = meta(&[(0, "hostA"), (1, "hostB")]);
        let table = vec![written(&[0], &[10], 0)];

        let partial = ByHostname::new(RoundRobin)
            .assign(PartialAssignment::from(table), &writers, &readers)
            .unwrap();
        assert_eq!(partial.assigned.len(), 0);
        assert_eq!(partial.not_assigned.len(), 1);
    }

    #[test]
    fn cuboid_slice_is_local_to_the_calling_rank() {
        let table = vec![written(&[0], &[30], 0)];
        let total = Extent::from_slice(&[30]);

        let mut per_rank_tables = Vec::new();
        for rank in 0..3 {
            let mut strategy =
                ByCuboidSlice::new(OneDimensionalBlockSlicer::default(), total.clone(), rank, 3);
            per_rank_tables.push(
                strategy
                    .assign_table(table.clone(), &RankMeta::new(), &meta(&[(0, "x"), (1, "x"), (2, "x")]))
                    .unwrap(),
            );
        }

        for (rank, assigned) in per_rank_tables.iter().enumerate() {
            assert_eq!(assigned.len(), 1);
            assert_eq!(assigned[0].source_id, rank as u32);
            assert_eq!(assigned[0].chunk.extent[0], 10);
        }
        let union: ChunkTable = per_rank_tables.into_iter().flatten().collect();
        assert!(coverage_1d(&union, 30).iter().all(|&c| c == 1));
    }

    #[test]
    fn bin_packing_is_total_and_disjoint() {
        let table = vec![
            written(&[0], &[17], 0),
            written(&[17], &[5], 0),
            written(&[22], &[40], 1),
            written(&[62], &[2], 2),
        ];
        let readers = meta(&[(0, "a"), (1, "b"), (2, "c")]);

        let assigned = BinPacking::default()
            .assign_table(table, &RankMeta::new(), &readers)
            .unwrap();

        assert!(coverage_1d(&assigned, 64).iter().all(|&c| c == 1));

        // every chunk is splittable to single slices, so nobody exceeds
        // twice the ideal volume
        let ideal = 64 / 3;
        for reader in readers.keys() {
            let load: u64 = assigned
                .iter()
                .filter(|c| c.source_id == *reader)
                .map(|c| c.chunk.volume())
                .sum();
            assert!(load <= 2 * ideal, "reader {reader} got {load} (ideal {ideal})");
        }
    }

    #[test]
    fn bin_packing_splits_along_the_requested_dimension() {
        let table = vec![written(&[0, 0], &[4, 12], 0)];
        let readers = meta(&[(0, "a"), (1, "b")]);

        let assigned = BinPacking { split_dim: 1 }
            .assign_table(table, &RankMeta::new(), &readers)
            .unwrap();

        let total: u64 = assigned.iter().map(|c| c.chunk.volume()).sum();
        assert_eq!(total, 48);
        for chunk in &assigned {
            // dimension 0 stays intact
            assert_eq!(chunk.chunk.offset[0], 0);
            assert_eq!(chunk.chunk.extent[0], 4);
        }
    }
}
