use multiversion_core::ClassIdentity;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Result of one class group's job. Errors are kept as text: they end up in
/// the run report.
pub type GroupResult<T> = (ClassIdentity, Result<T, String>);

/// Run `job` once per class on the blocking pool, at most `threads` at a
/// time. A failing or panicking job only fails its own group. Results come
/// back sorted by class.
pub async fn run_groups<T, F>(classes: Vec<ClassIdentity>, threads: usize, job: F) -> Vec<GroupResult<T>>
where
    T: Send + 'static,
    F: Fn(&ClassIdentity) -> anyhow::Result<T> + Send + Sync + 'static,
{
    let job = Arc::new(job);
    let permits = Arc::new(Semaphore::new(threads.max(1)));
    let mut tasks = JoinSet::new();

    for class in classes {
        let job = job.clone();
        let permits = permits.clone();
        tasks.spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => return (class, Err(e.to_string())),
            };
            let worker_class = class.clone();
            let result = match tokio::task::spawn_blocking(move || job(&worker_class)).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(format!("{e:#}")),
                Err(e) if e.is_panic() => Err(format!("worker panicked: {}", panic_message(e.into_panic()))),
                Err(e) => Err(e.to_string()),
            };
            if let Err(e) = &result {
                tracing::error!(class = %class, error = %e, "Group failed");
            }
            (class, result)
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => tracing::error!(error = %e, "Group task aborted"),
        }
    }
    results.sort_by(|a, b| a.0.cmp(&b.0));
    results
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_string(),
            Err(_) => "non-string payload".to_string(),
        },
    }
}
