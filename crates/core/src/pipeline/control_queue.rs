use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send>;

/// Runs control operations one at a time, in submission order, on a
/// dedicated worker thread.
///
/// Callers never wait for a job to run. Dropping the queue lets queued jobs
/// finish, then joins the worker.
pub struct ControlQueue {
    jobs: Option<crossbeam_channel::Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl ControlQueue {
    pub fn new(name: &str) -> Self {
        let (jobs, job_rx) = crossbeam_channel::unbounded::<Job>();
        let worker = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for job in job_rx {
                    job();
                }
            });
        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("Could not spawn control thread {name}: {e}");
                None
            }
        };
        Self {
            jobs: worker.is_some().then_some(jobs),
            worker,
        }
    }

    /// Queues `job`. Without a worker thread the job runs inline.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        let job: Job = Box::new(job);
        let Some(jobs) = self.jobs.as_ref() else {
            job();
            return;
        };
        if let Err(rejected) = jobs.send(job) {
            (rejected.into_inner())();
        }
    }

    /// Blocks until every job submitted before this call has run.
    pub fn barrier(&self) {
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        self.submit(move || {
            let _ = done_tx.send(());
        });
        let _ = done_rx.recv();
    }
}

impl Drop for ControlQueue {
    fn drop(&mut self) {
        self.jobs = None;
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() == std::thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                log::error!("Control thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_jobs_run_in_submission_order() {
        let queue = ControlQueue::new("test-control");
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..20 {
            let seen = Arc::clone(&seen);
            queue.submit(move || seen.lock().unwrap().push(i));
        }
        queue.barrier();
        assert_eq!(*seen.lock().unwrap(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_jobs_run_off_the_caller_thread() {
        let queue = ControlQueue::new("test-control");
        let caller = std::thread::current().id();
        let worker = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&worker);
        queue.submit(move || *slot.lock().unwrap() = Some(std::thread::current().id()));
        queue.barrier();
        assert_ne!(worker.lock().unwrap().unwrap(), caller);
    }

    #[test]
    fn test_drop_drains_pending_jobs() {
        let count = Arc::new(Mutex::new(0));
        {
            let queue = ControlQueue::new("test-control");
            for _ in 0..5 {
                let count = Arc::clone(&count);
                queue.submit(move || {
                    std::thread::sleep(std::time::Duration::from_millis(2));
                    *count.lock().unwrap() += 1;
                });
            }
        }
        assert_eq!(*count.lock().unwrap(), 5);
    }
}
