use chrono::Utc;

use quorumd::models::{
    ExecutionStatus, Job, JobExecution, JobStatus, JobSubmitRequest, Node, NodeRegisterRequest,
};
use quorumd::store::Store;
use quorumd::verifier::Verifier;

async fn setup() -> (Store, Verifier) {
    let store = Store::in_memory().await.unwrap();
    let verifier = Verifier::new(store.clone());
    (store, verifier)
}

async fn create_job(store: &Store, redundancy: i64, consensus: i64) -> Job {
    let mut job = Job::from_request(JobSubmitRequest {
        name: "verify-me".to_string(),
        description: String::new(),
        docker_image: "alpine:latest".to_string(),
        command: vec!["echo".to_string(), "hi".to_string()],
        environment: Default::default(),
        input_data: String::new(),
        required_cpu: 1,
        required_memory: 1,
        required_gpu: false,
    });
    job.redundancy = redundancy;
    job.consensus = consensus;
    store.create_job(&job).await.unwrap();
    store
        .update_job_status(&job.id, JobStatus::Scheduled, "", "")
        .await
        .unwrap();
    job
}

async fn register_node(store: &Store, id: &str) {
    let node = Node::from_request(NodeRegisterRequest {
        id: id.to_string(),
        name: format!("node {id}"),
        region: String::new(),
        cpu_cores: 4,
        memory_gb: 8,
        gpu_enabled: false,
        gpu_model: String::new(),
    });
    store.register_node(&node).await.unwrap();
}

/// One execution that already completed with the given result and hash.
async fn completed_execution(store: &Store, job_id: &str, node_id: &str, result: &str, hash: &str) {
    let mut execution = JobExecution::new(job_id, node_id);
    execution.status = ExecutionStatus::Completed;
    execution.completed_at = Some(Utc::now());
    execution.result = result.to_string();
    execution.result_hash = hash.to_string();
    store.create_job_execution(&execution).await.unwrap();
    store.update_job_execution(&execution).await.unwrap();
}

#[tokio::test]
async fn test_unanimous_consensus_finalizes_job() {
    let (store, verifier) = setup().await;
    let job = create_job(&store, 3, 2).await;
    for id in ["a", "b", "c"] {
        register_node(&store, id).await;
        completed_execution(&store, &job.id, id, "hello", "h1").await;
    }

    let result = verifier.check_and_finalize(&job.id).await.unwrap();
    assert!(result.consensus_reached);
    assert_eq!(result.consensus_result, "hello");
    assert_eq!(result.total_executions, 3);
    assert_eq!(result.result_counts.get("h1"), Some(&3));
    assert_eq!(result.agreement_nodes.len(), 3);
    assert!(result.disagreement_nodes.is_empty());

    let finalized = store.get_job(&job.id).await.unwrap();
    assert_eq!(finalized.status, JobStatus::Completed);
    assert_eq!(finalized.result, "hello");
    assert!(finalized.completed_at.is_some());

    for id in ["a", "b", "c"] {
        let node = store.get_node(id).await.unwrap();
        assert_eq!(node.reputation_score, 105.0);
        assert_eq!(node.successful_jobs_run, 1);
        assert_eq!(node.credits_earned, 1);
    }
}

#[tokio::test]
async fn test_minority_fault_is_penalized() {
    let (store, verifier) = setup().await;
    let job = create_job(&store, 3, 2).await;
    for id in ["a", "b", "c"] {
        register_node(&store, id).await;
    }
    completed_execution(&store, &job.id, "a", "42", "h-good").await;
    completed_execution(&store, &job.id, "b", "42", "h-good").await;
    completed_execution(&store, &job.id, "c", "41", "h-bad").await;

    let result = verifier.check_and_finalize(&job.id).await.unwrap();
    assert!(result.consensus_reached);
    assert_eq!(result.consensus_result, "42");
    assert_eq!(result.disagreement_nodes, vec!["c".to_string()]);

    let finalized = store.get_job(&job.id).await.unwrap();
    assert_eq!(finalized.status, JobStatus::Completed);
    assert_eq!(finalized.result, "42");

    let good = store.get_node("a").await.unwrap();
    assert_eq!(good.reputation_score, 105.0);
    assert_eq!(good.successful_jobs_run, 1);

    let bad = store.get_node("c").await.unwrap();
    assert_eq!(bad.reputation_score, 90.0);
    assert_eq!(bad.failed_jobs, 1);
    assert_eq!(bad.credits_earned, 0);
}

#[tokio::test]
async fn test_all_distinct_hashes_reach_no_consensus() {
    let (store, verifier) = setup().await;
    let job = create_job(&store, 3, 2).await;
    for (id, hash) in [("a", "h1"), ("b", "h2"), ("c", "h3")] {
        register_node(&store, id).await;
        completed_execution(&store, &job.id, id, hash, hash).await;
    }

    let result = verifier.check_and_finalize(&job.id).await.unwrap();
    assert!(!result.consensus_reached);
    assert_eq!(result.total_executions, 3);

    // No state was touched: job still active, reputations untouched.
    let fetched = store.get_job(&job.id).await.unwrap();
    assert_eq!(fetched.status, JobStatus::Scheduled);
    for id in ["a", "b", "c"] {
        let node = store.get_node(id).await.unwrap();
        assert_eq!(node.reputation_score, 100.0);
        assert_eq!(node.total_jobs_run, 0);
    }
}

#[tokio::test]
async fn test_fewer_than_k_completed_is_pending() {
    let (store, verifier) = setup().await;
    let job = create_job(&store, 3, 2).await;
    register_node(&store, "a").await;
    completed_execution(&store, &job.id, "a", "hello", "h1").await;

    let result = verifier.verify(&job.id).await.unwrap();
    assert!(!result.consensus_reached);
    assert_eq!(result.total_executions, 1);
    assert!(result.result_counts.is_empty());
}

#[tokio::test]
async fn test_quorum_from_partial_completion() {
    // Two of three agreeing is enough even if the third never reports.
    let (store, verifier) = setup().await;
    let job = create_job(&store, 3, 2).await;
    for id in ["a", "b", "c"] {
        register_node(&store, id).await;
    }
    completed_execution(&store, &job.id, "a", "hello", "h1").await;
    completed_execution(&store, &job.id, "b", "hello", "h1").await;
    store
        .create_job_execution(&JobExecution::new(&job.id, "c"))
        .await
        .unwrap();

    let result = verifier.check_and_finalize(&job.id).await.unwrap();
    assert!(result.consensus_reached);

    let finalized = store.get_job(&job.id).await.unwrap();
    assert_eq!(finalized.status, JobStatus::Completed);

    // The straggler is not penalized; it never voted.
    let straggler = store.get_node("c").await.unwrap();
    assert_eq!(straggler.reputation_score, 100.0);
    assert_eq!(straggler.total_jobs_run, 0);
}

#[tokio::test]
async fn test_tie_break_picks_smallest_hash() {
    let (store, verifier) = setup().await;
    let job = create_job(&store, 2, 1).await;
    register_node(&store, "a").await;
    register_node(&store, "b").await;
    completed_execution(&store, &job.id, "a", "beta", "ffff").await;
    completed_execution(&store, &job.id, "b", "alpha", "aaaa").await;

    for _ in 0..3 {
        let result = verifier.verify(&job.id).await.unwrap();
        assert!(result.consensus_reached);
        assert_eq!(result.consensus_result, "alpha");
        assert_eq!(result.agreement_nodes, vec!["b".to_string()]);
        assert_eq!(result.disagreement_nodes, vec!["a".to_string()]);
    }
}

#[tokio::test]
async fn test_single_node_job() {
    let (store, verifier) = setup().await;
    let job = create_job(&store, 1, 1).await;
    register_node(&store, "solo").await;
    completed_execution(&store, &job.id, "solo", "out", "h1").await;

    let result = verifier.check_and_finalize(&job.id).await.unwrap();
    assert!(result.consensus_reached);

    let finalized = store.get_job(&job.id).await.unwrap();
    assert_eq!(finalized.status, JobStatus::Completed);
    assert_eq!(finalized.result, "out");
}

#[tokio::test]
async fn test_k_equals_n_requires_unanimity() {
    let (store, verifier) = setup().await;
    let job = create_job(&store, 3, 3).await;
    for id in ["a", "b", "c"] {
        register_node(&store, id).await;
    }
    completed_execution(&store, &job.id, "a", "same", "h1").await;
    completed_execution(&store, &job.id, "b", "same", "h1").await;
    completed_execution(&store, &job.id, "c", "different", "h2").await;

    let result = verifier.check_and_finalize(&job.id).await.unwrap();
    assert!(!result.consensus_reached);
    assert_eq!(
        store.get_job(&job.id).await.unwrap().status,
        JobStatus::Scheduled
    );
}

#[tokio::test]
async fn test_finalization_is_idempotent() {
    let (store, verifier) = setup().await;
    let job = create_job(&store, 3, 2).await;
    for id in ["a", "b", "c"] {
        register_node(&store, id).await;
        completed_execution(&store, &job.id, id, "hello", "h1").await;
    }

    let first = verifier.check_and_finalize(&job.id).await.unwrap();
    let second = verifier.check_and_finalize(&job.id).await.unwrap();

    assert!(first.consensus_reached);
    assert!(second.consensus_reached);
    assert_eq!(first.consensus_result, second.consensus_result);
    assert_eq!(first.result_counts, second.result_counts);

    // Reputation applied exactly once.
    for id in ["a", "b", "c"] {
        let node = store.get_node(id).await.unwrap();
        assert_eq!(node.reputation_score, 105.0);
        assert_eq!(node.total_jobs_run, 1);
        assert_eq!(node.credits_earned, 1);
    }
}
