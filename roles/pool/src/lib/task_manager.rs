use std::sync::Mutex as StdMutex;
use tokio::task::JoinHandle;

/// Tracks every task the front-end spawns so shutdown can join or abort
/// them in one place.
pub struct TaskManager {
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            tasks: StdMutex::new(Vec::new()),
        }
    }

    pub fn spawn<F>(&self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        self.tasks.lock().unwrap().push(handle);
    }

    /// Waits for every tracked task to finish.
    pub async fn join_all(&self) {
        let handles = {
            let mut tasks = self.tasks.lock().unwrap();
            std::mem::take(&mut *tasks)
        };
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Cancels every tracked task without waiting.
    pub fn abort_all(&self) {
        let mut tasks = self.tasks.lock().unwrap();
        for handle in tasks.drain(..) {
            handle.abort();
        }
    }
}
