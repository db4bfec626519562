/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! `updateConsensusParams` feature flags.
//!
//! The owner of the feature flags contract schedules consensus parameter changes by creating
//! `updateConsensusParams` documents. A document takes effect in the block whose height equals its
//! `enableAtHeight` property. Parameters are flat document properties named `<section>.<param>`, e.g.
//! `block.maxBytes`.

use crate::types::{
    data_types::BlockHeight,
    platform_state::Document,
};

use super::messages::{BlockParams, ConsensusParams, EvidenceParams, VersionParams};

pub const ENABLE_AT_HEIGHT_PROPERTY: &str = "enableAtHeight";

pub fn is_enabled_at(document: &Document, height: BlockHeight) -> bool {
    document
        .property(ENABLE_AT_HEIGHT_PROPERTY)
        .and_then(|value| value.as_u64())
        == Some(height.int())
}

/// The consensus parameter changes the documents enabled at `height` make. Later documents override
/// sections set by earlier ones. `None` if no document is enabled at `height`.
pub fn consensus_param_updates(documents: &[Document], height: BlockHeight) -> Option<ConsensusParams> {
    let mut enabled = documents
        .iter()
        .filter(|document| is_enabled_at(document, height))
        .peekable();
    enabled.peek()?;

    let mut params = ConsensusParams::default();
    for document in enabled {
        let get = |name: &str| document.property(name).and_then(|value| value.as_u64());

        if let (Some(max_bytes), Some(max_gas)) = (get("block.maxBytes"), get("block.maxGas")) {
            params.block = Some(BlockParams { max_bytes, max_gas });
        }
        if let (Some(max_age_num_blocks), Some(max_age_duration_ms), Some(max_bytes)) = (
            get("evidence.maxAgeNumBlocks"),
            get("evidence.maxAgeDuration"),
            get("evidence.maxBytes"),
        ) {
            params.evidence = Some(EvidenceParams {
                max_age_num_blocks,
                max_age_duration_ms,
                max_bytes,
            });
        }
        if let Some(app_version) = get("version.appVersion") {
            params.version = Some(VersionParams { app_version });
        }
    }
    Some(params)
}
