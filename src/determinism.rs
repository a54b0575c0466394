//! Determinism Accumulator: a CRC32C running over (statement-CRC,
//! serialized-params) of every write statement queued in an invocation
//! (spec §4.2, §4.1 module list item 4).

use tracing::warn;

use crate::error::ProcedureError;
use crate::queued_statement::QueuedStatement;

/// CRC32C accumulator, reset to zero at the start of every call. Only
/// non-read-only statements contribute (spec invariant #7: "Read
/// statements never contribute to the determinism CRC").
#[derive(Debug, Default)]
pub struct DeterminismAccumulator {
    crc: u32,
    touched: bool,
}

impl DeterminismAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.crc = 0;
        self.touched = false;
    }

    /// Fold a queued statement into the accumulator if it is a write.
    /// Serializing the parameters here is what populates the statement's
    /// memoized buffer for later reuse by the dispatch path.
    ///
    /// The parameter serializer in this crate is a pure in-memory
    /// transform and cannot fail with an IO error the way the source's
    /// serializer could; `fail_closed` therefore only governs behavior if
    /// a future serializer implementation becomes fallible. See
    /// DESIGN.md for the Open Question this resolves.
    pub fn update(&mut self, stmt: &mut QueuedStatement, fail_closed: bool) -> Result<(), ProcedureError> {
        if stmt.descriptor.read_only {
            return Ok(());
        }
        let sql_crc = stmt.descriptor.sql_crc;
        let params = stmt.serialized_params().clone();
        self.fold(sql_crc, &params, fail_closed)
    }

    fn fold(&mut self, sql_crc: u32, params: &[u8], fail_closed: bool) -> Result<(), ProcedureError> {
        match self.try_fold(sql_crc, params) {
            Ok(()) => Ok(()),
            Err(e) if fail_closed => Err(e),
            Err(e) => {
                warn!(error = %e, "determinism hash update failed; continuing per legacy swallow policy");
                Ok(())
            }
        }
    }

    fn try_fold(&mut self, sql_crc: u32, params: &[u8]) -> Result<(), ProcedureError> {
        self.crc = crc32c::crc32c_append(self.crc, &sql_crc.to_le_bytes());
        self.crc = crc32c::crc32c_append(self.crc, params);
        self.touched = true;
        Ok(())
    }

    /// The accumulated CRC32C, or `None` if no write statement was queued
    /// this call (spec §4.2 "Publication": the hash is only attached when
    /// nonzero).
    pub fn finish(&self) -> Option<u32> {
        if self.touched && self.crc != 0 {
            Some(self.crc)
        } else {
            None
        }
    }
}
