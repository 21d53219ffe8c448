#[cfg(test)]
mod tests {
    use crate::completion::CompletionCell;
    use crate::errors::ClientError;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_first_completion_wins() {
        let cell = CompletionCell::new();

        assert!(!cell.is_done());
        assert!(cell.complete(1u32));
        assert!(!cell.complete(2));
        assert!(!cell.complete_with_error(ClientError::Cancelled));

        assert!(cell.is_done());
        assert!(!cell.is_completed_exceptionally());
        assert_eq!(cell.get().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_error_and_cancellation() {
        let failed: CompletionCell<u32> = CompletionCell::new();
        failed.complete_with_error(ClientError::InvalidResponse("empty body".into()));
        assert!(failed.is_completed_exceptionally());
        assert!(!failed.is_cancelled());
        assert!(matches!(
            failed.get().await,
            Err(ClientError::InvalidResponse(_))
        ));

        let cancelled: CompletionCell<u32> = CompletionCell::new();
        assert!(cancelled.cancel());
        assert!(cancelled.is_cancelled());
        assert!(!cancelled.complete(5));
        assert!(matches!(cancelled.get().await, Err(ClientError::Cancelled)));
    }

    /// A bounded wait that elapses reports a timeout and leaves the cell pending,
    /// so a later completion is still observed by new waiters.
    #[tokio::test]
    async fn test_timeout_does_not_mutate_state() {
        let cell: CompletionCell<&'static str> = CompletionCell::new();

        let result = cell.get_with_timeout(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(ClientError::Timeout(_))));
        assert!(!cell.is_done());

        assert!(cell.complete("late"));
        assert_eq!(cell.get_with_timeout(Duration::from_millis(20)).await.unwrap(), "late");
    }

    #[tokio::test]
    async fn test_many_waiters_see_the_same_value() {
        let cell: Arc<CompletionCell<String>> = Arc::new(CompletionCell::new());

        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let cell = Arc::clone(&cell);
                tokio::spawn(async move { cell.get().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(10)).await;
        let producer = Arc::clone(&cell);
        tokio::spawn(async move { producer.complete("done".to_string()) });

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap().unwrap(), "done");
        }
    }

    #[tokio::test]
    async fn test_already_completed() {
        let cell = CompletionCell::completed(7u8);
        assert!(cell.is_done());
        assert_eq!(cell.try_get().unwrap().unwrap(), 7);
        assert_eq!(cell.get_with_timeout(Duration::ZERO).await.unwrap(), 7);
    }
}
