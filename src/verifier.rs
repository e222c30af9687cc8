use std::collections::HashMap;

use crate::error::Result;
use crate::models::{ExecutionStatus, JobStatus, VerificationResult};
use crate::store::Store;

/// Reputation delta for a node whose hash matched the consensus.
pub const AGREEMENT_REWARD: f64 = 5.0;
/// Reputation delta for a node whose hash did not.
pub const DISAGREEMENT_PENALTY: f64 = -10.0;
/// Credits paid per agreeing execution.
pub const AGREEMENT_CREDITS: i64 = 1;

/// Tallies result hashes across a job's completed executions and finalizes
/// the job once k of n agree.
#[derive(Clone)]
pub struct Verifier {
    store: Store,
}

impl Verifier {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Tally the vote over completed executions of `job_id`.
    ///
    /// Read-only: no job or node state changes here, whatever the outcome.
    /// When vote counts tie at the maximum, the lexicographically smallest
    /// hash wins, so repeated runs pick the same winner.
    pub async fn verify(&self, job_id: &str) -> Result<VerificationResult> {
        let job = self.store.get_job(job_id).await?;
        let executions = self.store.list_job_executions(job_id).await?;

        let completed: Vec<_> = executions
            .iter()
            .filter(|e| e.status == ExecutionStatus::Completed && !e.result_hash.is_empty())
            .collect();

        tracing::debug!(
            job_id,
            completed = completed.len(),
            redundancy = job.redundancy,
            "Tallying executions"
        );

        if (completed.len() as i64) < job.consensus {
            return Ok(VerificationResult::pending(job_id, completed.len()));
        }

        let mut result_counts: HashMap<String, usize> = HashMap::new();
        let mut result_data: HashMap<String, String> = HashMap::new();
        let mut hash_to_nodes: HashMap<String, Vec<String>> = HashMap::new();

        for exec in &completed {
            *result_counts.entry(exec.result_hash.clone()).or_default() += 1;
            result_data
                .entry(exec.result_hash.clone())
                .or_insert_with(|| exec.result.clone());
            hash_to_nodes
                .entry(exec.result_hash.clone())
                .or_default()
                .push(exec.node_id.clone());
        }

        let mut consensus_hash = "";
        let mut max_votes = 0usize;
        for (hash, count) in &result_counts {
            if *count > max_votes || (*count == max_votes && hash.as_str() < consensus_hash) {
                max_votes = *count;
                consensus_hash = hash.as_str();
            }
        }

        let consensus_reached = (max_votes as i64) >= job.consensus;

        let mut agreement_nodes = Vec::new();
        let mut disagreement_nodes = Vec::new();
        for (hash, nodes) in &hash_to_nodes {
            if hash.as_str() == consensus_hash {
                agreement_nodes.extend(nodes.iter().cloned());
            } else {
                disagreement_nodes.extend(nodes.iter().cloned());
            }
        }

        Ok(VerificationResult {
            job_id: job_id.to_string(),
            total_executions: completed.len(),
            consensus_result: result_data.remove(consensus_hash).unwrap_or_default(),
            result_counts,
            consensus_reached,
            agreement_nodes,
            disagreement_nodes,
        })
    }

    /// Run the vote and, when consensus holds, finalize the job.
    ///
    /// The Completed transition is a compare-and-set on the job row, and the
    /// reputation deltas only apply when that transition actually happened.
    /// Calling this again on a finalized job changes nothing.
    pub async fn check_and_finalize(&self, job_id: &str) -> Result<VerificationResult> {
        let result = self.verify(job_id).await?;

        if !result.consensus_reached {
            tracing::debug!(
                job_id,
                completed = result.total_executions,
                "Consensus not yet reached"
            );
            return Ok(result);
        }

        let finalized = self
            .store
            .finalize_job_if_active(job_id, JobStatus::Completed, &result.consensus_result, "")
            .await?;

        if finalized {
            tracing::info!(
                job_id,
                agreed = result.agreement_nodes.len(),
                disagreed = result.disagreement_nodes.len(),
                "Consensus reached, job finalized"
            );
            self.apply_reputation(&result).await;
        }

        Ok(result)
    }

    async fn apply_reputation(&self, result: &VerificationResult) {
        for node_id in &result.agreement_nodes {
            if let Err(e) = self
                .store
                .update_node_reputation(node_id, AGREEMENT_REWARD)
                .await
            {
                tracing::warn!(node_id, error = %e, "Failed to update reputation");
            }
            if let Err(e) = self
                .store
                .increment_node_stats(node_id, true, AGREEMENT_CREDITS)
                .await
            {
                tracing::warn!(node_id, error = %e, "Failed to update node stats");
            }
        }

        for node_id in &result.disagreement_nodes {
            if let Err(e) = self
                .store
                .update_node_reputation(node_id, DISAGREEMENT_PENALTY)
                .await
            {
                tracing::warn!(node_id, error = %e, "Failed to update reputation");
            }
            if let Err(e) = self.store.increment_node_stats(node_id, false, 0).await {
                tracing::warn!(node_id, error = %e, "Failed to update node stats");
            }
        }
    }
}
