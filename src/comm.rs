//! # Process communicator seam
//!
//! This module defines [`ProcComm`], the abstract contract the pipeline
//! has with its distributed-process environment, and [`SerialComm`],
//! the single-process implementation used when no launcher is present.
//!
//! ## Overview
//!
//! The orchestration layer is single-threaded per process; all
//! parallelism comes from partitioning processes into **groups**, each
//! group owning a disjoint subset of observations. The communicator
//! provides exactly the operations the pipeline needs:
//!
//! 1. World size and rank.
//! 2. Forming a sub-grouping of a requested size
//!    ([`ProcComm::split`]), which **fails fast** when the group size
//!    does not evenly divide the world size — a fatal configuration
//!    error, never retried.
//! 3. A full collective barrier (used after each destriped
//!    realization to keep per-realization I/O ordered).
//! 4. Element-wise sum reductions for pixel-space accumulators.
//!
//! An MPI-backed implementation would wrap its communicator handle in
//! this trait; the library itself ships only [`SerialComm`].

use crate::todmc_errors::TodmcError;

/// Placement of the calling process after a grouping operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupInfo {
    /// Number of groups formed
    pub n_group: usize,
    /// Index of the group this process belongs to
    pub group: usize,
    /// Rank of this process within its group
    pub group_rank: usize,
    /// Number of processes per group
    pub group_size: usize,
}

/// Abstract contract with the distributed-process environment.
///
/// All reductions are collective over the **world** communicator; the
/// pipeline never reduces over a sub-group (each group owns disjoint
/// observations, so summing over the world is the map co-addition).
pub trait ProcComm: Send + Sync {
    /// Total number of processes in the run.
    fn world_size(&self) -> usize;

    /// Rank of the calling process in `[0, world_size)`.
    fn rank(&self) -> usize;

    /// Partition the world into groups of `group_size` processes.
    ///
    /// Return
    /// ----------
    /// * The placement of the calling process, or
    ///   [`TodmcError::InvalidProcessGrouping`] when `group_size` does
    ///   not evenly divide the world size.
    fn split(&self, group_size: usize) -> Result<GroupInfo, TodmcError> {
        let world = self.world_size();
        if group_size == 0 || world % group_size != 0 {
            return Err(TodmcError::InvalidProcessGrouping {
                world,
                group: group_size,
            });
        }
        let rank = self.rank();
        Ok(GroupInfo {
            n_group: world / group_size,
            group: rank / group_size,
            group_rank: rank % group_size,
            group_size,
        })
    }

    /// Full collective synchronization across all processes.
    fn barrier(&self);

    /// Element-wise sum of `buf` across all processes, result visible
    /// on every process.
    fn allreduce_sum(&self, buf: &mut [f64]);

    /// Same as [`ProcComm::allreduce_sum`] for hit counters.
    fn allreduce_sum_u64(&self, buf: &mut [u64]);

    /// Sum a scalar across all processes.
    fn allreduce_scalar(&self, value: f64) -> f64 {
        let mut buf = [value];
        self.allreduce_sum(&mut buf);
        buf[0]
    }
}

/// Single-process communicator: barriers and reductions are no-ops.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialComm;

impl ProcComm for SerialComm {
    fn world_size(&self) -> usize {
        1
    }

    fn rank(&self) -> usize {
        0
    }

    fn barrier(&self) {}

    fn allreduce_sum(&self, _buf: &mut [f64]) {}

    fn allreduce_sum_u64(&self, _buf: &mut [u64]) {}
}
