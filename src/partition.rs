//! Partition Check: verifies the currently assigned partition is
//! consistent with an invocation's partitioning parameter before first
//! execution (spec §4.8, §4.1 module list item "Partition Check").

use tracing::warn;

use crate::params::{SqlType, SqlValue};
use crate::types::PartitionId;

/// Declarative partitioning metadata for a procedure (spec §3 "Invocation
/// State": "partition metadata").
#[derive(Debug, Clone, Copy)]
pub struct Partitioning {
    pub single_partition: bool,
    /// Workaround flag for procedures still routed through the legacy
    /// hashinator (spec §9 open question: kept unconditionally true-passing
    /// per the source's documented workaround, not revisited here).
    pub legacy_hashinator: bool,
    /// `true` for ad-hoc single-partition SQL, where the partitioning value
    /// occupies argument slot 0 and slot 1 carries its type tag, rather
    /// than the procedure's declared `partition_column`.
    pub is_adhoc: bool,
    pub partition_column: usize,
    pub partition_column_type: SqlType,
}

/// Hashes a partitioning value to the partition id that owns it. An
/// external collaborator: the hash function is the data-partitioning
/// scheme's, not the runner's concern.
pub trait PartitionHasher: Send + Sync {
    fn hash(&self, value: &SqlValue) -> Result<PartitionId, String>;
}

/// `true` if `assigned` is consistent with where `args` would route,
/// `false` if the invocation must restart on the correct partition.
/// Multi-partition procedures and legacy-hashinator procedures always
/// report consistent (spec §4.8).
pub fn check_partition(
    partitioning: &Partitioning,
    args: &[SqlValue],
    assigned: PartitionId,
    hasher: &dyn PartitionHasher,
) -> bool {
    if !partitioning.single_partition || partitioning.legacy_hashinator {
        return true;
    }

    let slot = if partitioning.is_adhoc { 0 } else { partitioning.partition_column };
    let Some(value) = args.get(slot) else {
        warn!(slot, "partition check: missing partitioning argument, treating as mismatch");
        return false;
    };

    match hasher.hash(value) {
        Ok(hashed) => hashed == assigned,
        Err(reason) => {
            warn!(reason, "partition check: hashing failed, treating as mismatch");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ModuloHasher(i32);

    impl PartitionHasher for ModuloHasher {
        fn hash(&self, value: &SqlValue) -> Result<PartitionId, String> {
            match value {
                SqlValue::BigInt(v) => Ok(PartitionId((*v as i32).rem_euclid(self.0))),
                other => Err(format!("cannot hash {other:?}")),
            }
        }
    }

    fn single_partition() -> Partitioning {
        Partitioning {
            single_partition: true,
            legacy_hashinator: false,
            is_adhoc: false,
            partition_column: 0,
            partition_column_type: SqlType::BigInt,
        }
    }

    #[test]
    fn multipartition_never_checked() {
        let p = Partitioning {
            single_partition: false,
            ..single_partition()
        };
        let hasher = ModuloHasher(4);
        assert!(check_partition(&p, &[SqlValue::BigInt(99)], PartitionId(0), &hasher));
    }

    #[test]
    fn legacy_hashinator_never_checked() {
        let p = Partitioning {
            legacy_hashinator: true,
            ..single_partition()
        };
        let hasher = ModuloHasher(4);
        assert!(check_partition(&p, &[SqlValue::BigInt(99)], PartitionId(0), &hasher));
    }

    #[test]
    fn matching_partition_is_consistent() {
        let p = single_partition();
        let hasher = ModuloHasher(4);
        assert!(check_partition(&p, &[SqlValue::BigInt(8)], PartitionId(0), &hasher));
    }

    #[test]
    fn mismatched_partition_is_inconsistent() {
        let p = single_partition();
        let hasher = ModuloHasher(4);
        assert!(!check_partition(&p, &[SqlValue::BigInt(9)], PartitionId(0), &hasher));
    }

    #[test]
    fn hashing_failure_is_treated_as_mismatch() {
        let p = single_partition();
        let hasher = ModuloHasher(4);
        assert!(!check_partition(&p, &[SqlValue::String(Some("x".into()))], PartitionId(0), &hasher));
    }

    #[test]
    fn adhoc_uses_slot_zero_regardless_of_declared_column() {
        let p = Partitioning {
            is_adhoc: true,
            partition_column: 3,
            ..single_partition()
        };
        let hasher = ModuloHasher(4);
        assert!(check_partition(&p, &[SqlValue::BigInt(8)], PartitionId(0), &hasher));
    }
}
