/// Survey how the target answers across the byte space, to help pick a
/// predicate before attacking.
use crate::{Error, OracleCaller, OracleResult, Transport};

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use futures::stream::{self, StreamExt};
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct ResponseAnalysis {
    pub responses: BTreeMap<u8, OracleResult>,
    pub status_codes: BTreeMap<u16, usize>,
    pub body_lengths: BTreeMap<usize, usize>,
    pub timings: Vec<Duration>,
    pub saved_to: Option<PathBuf>,
}

impl ResponseAnalysis {
    /// True when every probe got the same status and body length, i.e. no
    /// obvious oracle signal.
    pub fn is_uniform(&self) -> bool {
        self.status_codes.len() <= 1 && self.body_lengths.len() <= 1
    }

    fn record(&mut self, byte: u8, result: OracleResult) {
        *self.status_codes.entry(result.status).or_default() += 1;
        *self.body_lengths.entry(result.body.len()).or_default() += 1;
        self.timings.push(result.elapsed);
        self.responses.insert(byte, result);
    }
}

/// The probe for `byte`: two zero blocks with the last byte of the first set.
pub fn survey_payload(block_size: usize, byte: u8) -> Vec<u8> {
    let mut payload = vec![0u8; block_size * 2];
    payload[block_size - 1] = byte;
    payload
}

pub async fn analyse_responses<T: Transport + Sync>(
    oracle: &OracleCaller<T>,
    block_size: usize,
    save_dir: Option<&Path>,
) -> Result<ResponseAnalysis, Error> {
    let block_size = crate::probe::check_block_size(block_size)?;
    let mut probes = stream::iter(0..=u8::MAX)
        .map(|byte| async move {
            let result = oracle.call_oracle(&survey_payload(block_size, byte)).await;
            (byte, result)
        })
        .buffer_unordered(oracle.concurrency());

    let mut analysis = ResponseAnalysis::default();
    while let Some((byte, result)) = probes.next().await {
        let result = result.map_err(|source| Error::Survey { byte, source })?;
        analysis.record(byte, result);
    }

    if let Some(dir) = save_dir {
        tokio::fs::create_dir_all(dir).await?;
        for (byte, result) in &analysis.responses {
            let text = response_text(&survey_payload(block_size, *byte), result);
            tokio::fs::write(dir.join(format!("{byte}.html")), text).await?;
        }
        info!("saved {} responses to {}", analysis.responses.len(), dir.display());
        analysis.saved_to = Some(dir.to_path_buf());
    }

    Ok(analysis)
}

fn response_text(payload: &[u8], result: &OracleResult) -> String {
    format!(
        "<!--\nFrom {}\nPayload: {}\nTime taken: {}ms\n\n{}\n{}-->\n{}",
        result.url,
        hex::encode(payload),
        result.elapsed.as_millis(),
        result.status,
        result.serialized_headers(),
        result.body
    )
}
