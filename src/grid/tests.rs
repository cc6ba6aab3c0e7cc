//! Grid Module Tests
//!
//! Exercises the in-memory grid on its own, without any worker pool.
//!
//! ## Test Scopes
//! - **Registry**: Placeholder minting, payload upload, write-once results.
//! - **Submission**: Per-task validation and ownership transfer.
//! - **Dispatch**: Dependency gating, priority order, claim and completion.

#[cfg(test)]
mod tests {
    use crate::grid::client::{GridError, ResultRegistry, TaskQueue};
    use crate::grid::memory::InMemoryGrid;
    use crate::grid::types::*;
    use std::time::Duration;

    fn grid_with_session() -> (InMemoryGrid, SessionId) {
        let grid = InMemoryGrid::new();
        let session = grid.create_session(TaskOptions::default());
        (grid, session)
    }

    // ============================================================
    // REGISTRY TESTS
    // ============================================================

    #[tokio::test]
    async fn test_placeholders_are_unique_and_pending() {
        let (grid, session) = grid_with_session();

        let handles = grid.create_result_placeholders(&session, 3).await.unwrap();

        assert_eq!(handles.len(), 3);
        assert_ne!(handles[0], handles[1]);
        assert_ne!(handles[1], handles[2]);
        for handle in &handles {
            assert_eq!(grid.result_status(handle), Some(ResultStatus::Pending));
        }
    }

    #[test]
    fn test_session_keeps_default_options() {
        let grid = InMemoryGrid::new();
        let options = TaskOptions::default().with_partition("cpu").with_handler("sum");

        let session = grid.create_session(options.clone());

        assert_eq!(grid.session_options(&session), Some(options));
        assert_eq!(grid.session_options(&SessionId::new()), None);
    }

    #[tokio::test]
    async fn test_unknown_session_is_rejected() {
        let grid = InMemoryGrid::new();
        let session = SessionId::new();

        let result = grid.create_result_placeholders(&session, 1).await;

        assert_eq!(result, Err(GridError::UnknownSession(session)));
    }

    #[tokio::test]
    async fn test_result_is_written_once() {
        let (grid, session) = grid_with_session();
        let handle = grid
            .create_result_placeholders(&session, 1)
            .await
            .unwrap()
            .remove(0);

        grid.send_result(&session, &handle, vec![1, 0, 0, 0])
            .await
            .unwrap();
        let second = grid.send_result(&session, &handle, vec![2, 0, 0, 0]).await;

        assert!(matches!(second, Err(GridError::AlreadyTerminal { .. })));
        assert_eq!(
            grid.get_result(&session, &handle).await.unwrap(),
            vec![1, 0, 0, 0]
        );
    }

    #[tokio::test]
    async fn test_get_result_before_resolution_fails() {
        let (grid, session) = grid_with_session();
        let handle = grid
            .create_result_placeholders(&session, 1)
            .await
            .unwrap()
            .remove(0);

        let result = grid.get_result(&session, &handle).await;

        assert!(matches!(result, Err(GridError::NotResolved { .. })));
    }

    #[tokio::test]
    async fn test_results_are_scoped_to_their_session() {
        let grid = InMemoryGrid::new();
        let first = grid.create_session(TaskOptions::default());
        let second = grid.create_session(TaskOptions::default());
        let handle = grid
            .create_results_with_data(&first, vec![b"data".to_vec()])
            .await
            .unwrap()
            .remove(0);

        let result = grid.get_result(&second, &handle).await;

        assert_eq!(result, Err(GridError::SessionMismatch { handle }));
    }

    // ============================================================
    // SUBMISSION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_submission_with_unregistered_output_is_rejected() {
        let (grid, session) = grid_with_session();
        let payload = grid
            .create_results_with_data(&session, vec![b"{}".to_vec()])
            .await
            .unwrap()
            .remove(0);
        let registered = grid
            .create_result_placeholders(&session, 1)
            .await
            .unwrap()
            .remove(0);

        let outcomes = grid
            .submit_tasks(
                &session,
                vec![
                    TaskDescriptor::new(payload.clone(), registered),
                    TaskDescriptor::new(payload, ResultHandle::new()),
                ],
                &TaskOptions::default(),
            )
            .await
            .unwrap();

        // The valid task is accepted even though its sibling is not
        assert!(matches!(outcomes[0], SubmissionOutcome::Accepted(_)));
        match &outcomes[1] {
            SubmissionOutcome::Rejected { reason } => {
                assert!(reason.contains("not registered"), "{}", reason)
            }
            other => panic!("Expected rejection, got {:?}", other),
        }
        assert_eq!(grid.task_count(), 1);
    }

    #[tokio::test]
    async fn test_submission_transfers_output_ownership() {
        let (grid, session) = grid_with_session();
        let payload = grid
            .create_results_with_data(&session, vec![b"{}".to_vec()])
            .await
            .unwrap()
            .remove(0);
        let output = grid
            .create_result_placeholders(&session, 1)
            .await
            .unwrap()
            .remove(0);

        let outcomes = grid
            .submit_tasks(
                &session,
                vec![TaskDescriptor::new(payload, output.clone())],
                &TaskOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(grid.result_owner(&output).as_ref(), outcomes[0].task_id());
    }

    #[tokio::test]
    async fn test_submission_with_resolved_output_is_rejected() {
        let (grid, session) = grid_with_session();
        let payload = grid
            .create_results_with_data(&session, vec![b"{}".to_vec()])
            .await
            .unwrap()
            .remove(0);

        let outcomes = grid
            .submit_tasks(
                &session,
                vec![TaskDescriptor::new(payload.clone(), payload)],
                &TaskOptions::default(),
            )
            .await
            .unwrap();

        assert!(matches!(outcomes[0], SubmissionOutcome::Rejected { .. }));
    }

    /// A session with one uploaded payload and one pending output.
    async fn payload_and_output(grid: &InMemoryGrid, session: &SessionId) -> (ResultHandle, ResultHandle) {
        let payload = grid
            .create_results_with_data(session, vec![b"{}".to_vec()])
            .await
            .unwrap()
            .remove(0);
        let output = grid
            .create_result_placeholders(session, 1)
            .await
            .unwrap()
            .remove(0);
        (payload, output)
    }

    #[tokio::test]
    async fn test_second_producer_for_owned_output_is_rejected() {
        // ARRANGE: one task already expects the output
        let (grid, session) = grid_with_session();
        let (payload, output) = payload_and_output(&grid, &session).await;
        let first = grid
            .submit_tasks(
                &session,
                vec![TaskDescriptor::new(payload.clone(), output.clone())],
                &TaskOptions::default(),
            )
            .await
            .unwrap();

        // ACT: a second task claims the same output
        let second = grid
            .submit_tasks(
                &session,
                vec![TaskDescriptor::new(payload, output.clone())],
                &TaskOptions::default(),
            )
            .await
            .unwrap();

        // ASSERT: the first producer keeps it
        match &second[0] {
            SubmissionOutcome::Rejected { reason } => assert!(reason.contains("already owned")),
            other => panic!("Expected a rejection, got {:?}", other),
        }
        assert_eq!(grid.result_owner(&output).as_ref(), first[0].task_id());
        assert_eq!(grid.task_count(), 1);
    }

    #[tokio::test]
    async fn test_running_owner_can_delegate_its_output() {
        let (grid, session) = grid_with_session();
        let (payload, output) = payload_and_output(&grid, &session).await;
        let first = grid
            .submit_tasks(
                &session,
                vec![TaskDescriptor::new(payload.clone(), output.clone())],
                &TaskOptions::default(),
            )
            .await
            .unwrap();
        let owner = first[0].task_id().unwrap().clone();
        grid.try_claim_task(&owner, "worker-0").unwrap();

        let handed_over = grid
            .submit_tasks(
                &session,
                vec![TaskDescriptor::new(payload, output.clone()).delegated_by(owner.clone())],
                &TaskOptions::default(),
            )
            .await
            .unwrap();

        let successor = handed_over[0].task_id().unwrap().clone();
        assert_eq!(grid.result_owner(&output), Some(successor));

        // The delegating task no longer owes the output
        grid.complete_task(&owner, "worker-0", Ok(())).unwrap();
        assert_eq!(grid.task_status(&owner), Some(TaskStatus::Completed));
    }

    #[tokio::test]
    async fn test_pending_owner_cannot_delegate_its_output() {
        let (grid, session) = grid_with_session();
        let (payload, output) = payload_and_output(&grid, &session).await;
        let first = grid
            .submit_tasks(
                &session,
                vec![TaskDescriptor::new(payload.clone(), output.clone())],
                &TaskOptions::default(),
            )
            .await
            .unwrap();
        let owner = first[0].task_id().unwrap().clone();

        let outcomes = grid
            .submit_tasks(
                &session,
                vec![TaskDescriptor::new(payload, output.clone()).delegated_by(owner.clone())],
                &TaskOptions::default(),
            )
            .await
            .unwrap();

        assert!(matches!(outcomes[0], SubmissionOutcome::Rejected { .. }));
        assert_eq!(grid.result_owner(&output), Some(owner));
    }

    // ============================================================
    // DISPATCH TESTS
    // ============================================================

    #[tokio::test]
    async fn test_task_waits_for_its_dependencies() {
        let (grid, session) = grid_with_session();
        let payload = grid
            .create_results_with_data(&session, vec![b"{}".to_vec()])
            .await
            .unwrap()
            .remove(0);
        let handles = grid.create_result_placeholders(&session, 2).await.unwrap();
        let (dependency, output) = (handles[0].clone(), handles[1].clone());

        grid.submit_tasks(
            &session,
            vec![TaskDescriptor::new(payload, output).with_dependencies(vec![dependency.clone()])],
            &TaskOptions::default(),
        )
        .await
        .unwrap();

        // ASSERT: Not dispatchable while the dependency is pending
        assert!(grid.dispatchable_tasks("default").is_empty());

        grid.send_result(&session, &dependency, vec![9, 0, 0, 0])
            .await
            .unwrap();

        // ASSERT: Dispatchable once it resolves, with the bytes attached
        let tasks = grid.dispatchable_tasks("default");
        assert_eq!(tasks.len(), 1);

        let invocation = grid
            .try_claim_task(&tasks[0].0, "worker-0")
            .unwrap()
            .expect("task should be claimable");
        assert_eq!(invocation.payload, b"{}".to_vec());
        assert_eq!(invocation.dependencies[&dependency], vec![9, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_dispatch_respects_partition_and_priority() {
        let (grid, session) = grid_with_session();
        let payload = grid
            .create_results_with_data(&session, vec![b"{}".to_vec()])
            .await
            .unwrap()
            .remove(0);
        let outputs = grid.create_result_placeholders(&session, 3).await.unwrap();

        let low = TaskOptions::default();
        let high = TaskOptions {
            priority: 5,
            ..TaskOptions::default()
        };
        let elsewhere = TaskOptions::default().with_partition("gpu");

        let mut descriptors = Vec::new();
        for (output, options) in outputs.iter().zip([low, high, elsewhere]) {
            let mut descriptor = TaskDescriptor::new(payload.clone(), output.clone());
            descriptor.options = Some(options);
            descriptors.push(descriptor);
        }
        let outcomes = grid
            .submit_tasks(&session, descriptors, &TaskOptions::default())
            .await
            .unwrap();

        let tasks = grid.dispatchable_tasks("default");

        assert_eq!(tasks.len(), 2);
        assert_eq!(Some(&tasks[0].0), outcomes[1].task_id());
        assert_eq!(Some(&tasks[1].0), outcomes[0].task_id());
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let (grid, session) = grid_with_session();
        let payload = grid
            .create_results_with_data(&session, vec![b"{}".to_vec()])
            .await
            .unwrap()
            .remove(0);
        let output = grid
            .create_result_placeholders(&session, 1)
            .await
            .unwrap()
            .remove(0);
        let outcomes = grid
            .submit_tasks(
                &session,
                vec![TaskDescriptor::new(payload, output)],
                &TaskOptions::default(),
            )
            .await
            .unwrap();
        let task_id = outcomes[0].task_id().unwrap().clone();

        assert!(grid.try_claim_task(&task_id, "worker-0").unwrap().is_some());
        assert!(grid.try_claim_task(&task_id, "worker-1").unwrap().is_none());
        assert_eq!(grid.task_status(&task_id), Some(TaskStatus::Running));
    }

    #[tokio::test]
    async fn test_success_without_writing_output_fails_task() {
        let (grid, session) = grid_with_session();
        let payload = grid
            .create_results_with_data(&session, vec![b"{}".to_vec()])
            .await
            .unwrap()
            .remove(0);
        let output = grid
            .create_result_placeholders(&session, 1)
            .await
            .unwrap()
            .remove(0);
        let outcomes = grid
            .submit_tasks(
                &session,
                vec![TaskDescriptor::new(payload, output.clone())],
                &TaskOptions::default(),
            )
            .await
            .unwrap();
        let task_id = outcomes[0].task_id().unwrap().clone();
        grid.try_claim_task(&task_id, "worker-0").unwrap();

        grid.complete_task(&task_id, "worker-0", Ok(())).unwrap();

        assert!(matches!(
            grid.task_status(&task_id),
            Some(TaskStatus::Failed { .. })
        ));
        assert!(matches!(
            grid.result_status(&output),
            Some(ResultStatus::Failed { .. })
        ));
    }

    #[tokio::test]
    async fn test_expired_lease_is_retried_then_failed() {
        let grid = InMemoryGrid::with_lease_duration(0);
        let session = grid.create_session(TaskOptions::default());
        let payload = grid
            .create_results_with_data(&session, vec![b"{}".to_vec()])
            .await
            .unwrap()
            .remove(0);
        let output = grid
            .create_result_placeholders(&session, 1)
            .await
            .unwrap()
            .remove(0);
        let options = TaskOptions {
            max_retries: 1,
            ..TaskOptions::default()
        };
        let outcomes = grid
            .submit_tasks(&session, vec![TaskDescriptor::new(payload, output.clone())], &options)
            .await
            .unwrap();
        let task_id = outcomes[0].task_id().unwrap().clone();

        // First attempt, then one retry after the lease lapses
        assert!(grid.try_claim_task(&task_id, "worker-0").unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(grid.try_claim_task(&task_id, "worker-1").unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(5)).await;

        // Retries exhausted
        assert!(grid.try_claim_task(&task_id, "worker-2").unwrap().is_none());
        assert!(matches!(
            grid.task_status(&task_id),
            Some(TaskStatus::Failed { .. })
        ));
        assert!(matches!(
            grid.result_status(&output),
            Some(ResultStatus::Failed { .. })
        ));
    }

    #[tokio::test]
    async fn test_stale_lease_holder_cannot_renew_or_complete() {
        // ARRANGE: worker-a's lease lapses and worker-b reclaims the task
        let grid = InMemoryGrid::with_lease_duration(0);
        let session = grid.create_session(TaskOptions::default());
        let (payload, output) = payload_and_output(&grid, &session).await;
        let outcomes = grid
            .submit_tasks(
                &session,
                vec![TaskDescriptor::new(payload, output.clone())],
                &TaskOptions::default(),
            )
            .await
            .unwrap();
        let task_id = outcomes[0].task_id().unwrap().clone();
        assert!(grid.try_claim_task(&task_id, "worker-a").unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(grid.try_claim_task(&task_id, "worker-b").unwrap().is_some());

        // ACT + ASSERT: the stale worker is refused
        assert!(grid.renew_lease(&task_id, "worker-a").is_err());
        let err = grid
            .complete_task(&task_id, "worker-a", Err(anyhow::anyhow!("gave up")))
            .unwrap_err();
        assert!(err.to_string().contains("leased to"));
        assert_eq!(grid.task_status(&task_id), Some(TaskStatus::Running));
        assert_eq!(grid.result_status(&output), Some(ResultStatus::Pending));

        // The current holder still can
        grid.renew_lease(&task_id, "worker-b").unwrap();
        grid.send_result(&session, &output, vec![1, 0, 0, 0]).await.unwrap();
        grid.complete_task(&task_id, "worker-b", Ok(())).unwrap();
        assert_eq!(grid.task_status(&task_id), Some(TaskStatus::Completed));
    }

    #[tokio::test]
    async fn test_wait_for_result_times_out() {
        let (grid, session) = grid_with_session();
        let handle = grid
            .create_result_placeholders(&session, 1)
            .await
            .unwrap()
            .remove(0);

        let result = grid
            .wait_for_result(&session, &handle, Duration::from_millis(50))
            .await;

        assert!(result.unwrap_err().to_string().contains("Timed out"));
    }
}
