//! Simulation trace: executed jobs, memory accesses and the occupancy
//! intervals derived from them.

/// One firing of an actor on a processor.
#[derive(Clone, Debug)]
pub struct SimJob {
    /// Actor name, e.g. `a3`.
    pub task: String,
    /// Firing index within the task.
    pub job: usize,
    pub processor: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemAction {
    Read,
    Write,
}

/// A token transfer to or from a named memory, attributed to a job.
#[derive(Clone, Debug)]
pub struct MemAccess {
    pub task: String,
    pub job: usize,
    pub mem: String,
    pub action: MemAction,
    pub tokens: u64,
    pub start: f64,
    pub end: f64,
}

/// A span of schedule steps during which a memory held live tokens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OccupancyInterval {
    pub start_step: i64,
    pub end_step: i64,
    pub max_tokens: u64,
}

impl OccupancyInterval {
    fn unset() -> Self {
        OccupancyInterval {
            start_step: -1,
            end_step: -1,
            max_tokens: 0,
        }
    }

    /// Two intervals overlap when either contains the other's start step.
    pub fn overlaps(&self, other: &OccupancyInterval) -> bool {
        (self.start_step <= other.start_step && other.start_step <= self.end_step)
            || (other.start_step <= self.start_step && self.start_step <= other.end_step)
    }
}

/// Everything recorded during one simulation run.
#[derive(Clone, Debug, Default)]
pub struct SimTrace {
    pub jobs: Vec<SimJob>,
    pub accesses: Vec<MemAccess>,
}

impl SimTrace {
    pub fn new() -> Self {
        SimTrace::default()
    }

    pub fn add_job(&mut self, job: SimJob) {
        self.jobs.push(job);
    }

    pub fn add_access(&mut self, access: MemAccess) {
        self.accesses.push(access);
    }

    /// End time of the last job executed on a processor, 0 if it idled.
    pub fn proc_time(&self, proc: &str) -> f64 {
        self.jobs
            .iter()
            .filter(|j| j.processor == proc)
            .fold(0.0, |t, j| t.max(j.end))
    }

    /// Names of all accessed memories, in first-access order.
    pub fn memory_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for access in &self.accesses {
            if !names.contains(&access.mem.as_str()) {
                names.push(&access.mem);
            }
        }
        names
    }

    fn accesses_of<'a>(&'a self, mem: &'a str) -> impl Iterator<Item = &'a MemAccess> + 'a {
        self.accesses.iter().filter(move |a| a.mem == mem)
    }

    /// Peak number of live tokens a memory ever held, replayed from its
    /// access records in execution order.
    pub fn max_stored_tokens(&self, mem: &str) -> u64 {
        let mut stored: i64 = 0;
        let mut peak: i64 = 0;
        for access in self.accesses_of(mem) {
            match access.action {
                MemAction::Write => stored += access.tokens as i64,
                MemAction::Read => stored -= access.tokens as i64,
            }
            peak = peak.max(stored);
        }
        peak.max(0) as u64
    }

    /// Jobs ordered by start time. The sort is stable, so simultaneous
    /// firings keep their recorded order.
    pub fn asap_schedule(&self) -> Vec<&SimJob> {
        let mut schedule: Vec<&SimJob> = self.jobs.iter().collect();
        schedule.sort_by(|a, b| a.start.total_cmp(&b.start));
        schedule
    }

    /// Execution step (position in `schedule`) of a job, -1 if absent.
    pub fn find_step(schedule: &[&SimJob], task: &str, job: usize) -> i64 {
        schedule
            .iter()
            .position(|j| j.task == task && j.job == job)
            .map(|p| p as i64)
            .unwrap_or(-1)
    }

    /// Exact occupancy intervals per memory: a new interval starts at the
    /// first access after the memory drained to zero tokens.
    pub fn occupancy_intervals(
        &self,
        schedule: &[&SimJob],
    ) -> Vec<(String, Vec<OccupancyInterval>)> {
        self.per_memory_intervals(schedule, false)
    }

    /// Coarse (first-in, last-out) occupancy: a single interval per memory
    /// spanning its first and last access steps.
    pub fn occupancy_intervals_coarse(
        &self,
        schedule: &[&SimJob],
    ) -> Vec<(String, Vec<OccupancyInterval>)> {
        self.per_memory_intervals(schedule, true)
    }

    fn per_memory_intervals(
        &self,
        schedule: &[&SimJob],
        coarse: bool,
    ) -> Vec<(String, Vec<OccupancyInterval>)> {
        let mut out = Vec::new();
        for mem in self.memory_names() {
            let mut intervals = Vec::new();
            let mut current = OccupancyInterval::unset();
            let mut stored: i64 = 0;
            for access in self.accesses_of(mem) {
                let step = Self::find_step(schedule, &access.task, access.job);
                if current.start_step == -1 && current.end_step == -1 {
                    current.start_step = step;
                }
                if coarse {
                    current.start_step = current.start_step.min(step);
                }
                current.end_step = current.end_step.max(step);
                match access.action {
                    MemAction::Write => stored += access.tokens as i64,
                    MemAction::Read => stored -= access.tokens as i64,
                }
                current.max_tokens = current.max_tokens.max(stored.max(0) as u64);
                if !coarse && stored == 0 {
                    intervals.push(current);
                    current = OccupancyInterval::unset();
                }
            }
            if coarse {
                intervals.push(current);
            }
            out.push((mem.to_string(), intervals));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(task: &str, job_id: usize, start: f64) -> SimJob {
        SimJob {
            task: task.to_string(),
            job: job_id,
            processor: "proc0".to_string(),
            start,
            end: start + 1.0,
        }
    }

    fn access(task: &str, job_id: usize, mem: &str, action: MemAction, tokens: u64) -> MemAccess {
        MemAccess {
            task: task.to_string(),
            job: job_id,
            mem: mem.to_string(),
            action,
            tokens,
            start: 0.0,
            end: 0.0,
        }
    }

    /// a0 writes twice, a1 drains twice: two exact intervals, one coarse.
    fn ping_pong_trace() -> SimTrace {
        let mut t = SimTrace::new();
        t.add_job(job("a0", 0, 0.0));
        t.add_job(job("a1", 0, 1.0));
        t.add_job(job("a0", 1, 2.0));
        t.add_job(job("a1", 1, 3.0));
        t.add_access(access("a0", 0, "a0_a1", MemAction::Write, 4));
        t.add_access(access("a1", 0, "a0_a1", MemAction::Read, 4));
        t.add_access(access("a0", 1, "a0_a1", MemAction::Write, 2));
        t.add_access(access("a1", 1, "a0_a1", MemAction::Read, 2));
        t
    }

    #[test]
    fn peak_tracks_running_balance() {
        let t = ping_pong_trace();
        assert_eq!(t.max_stored_tokens("a0_a1"), 4);
    }

    #[test]
    fn peak_lookup_borrows_the_name_only_for_the_call() {
        let t = ping_pong_trace();
        let peak = {
            let name = String::from("a0_a1");
            t.max_stored_tokens(&name)
        };
        assert_eq!(peak, 4);
        assert_eq!(t.max_stored_tokens("absent"), 0);
    }

    #[test]
    fn exact_intervals_split_on_drain() {
        let t = ping_pong_trace();
        let schedule = t.asap_schedule();
        let per_mem = t.occupancy_intervals(&schedule);
        assert_eq!(per_mem.len(), 1);
        let (mem, intervals) = &per_mem[0];
        assert_eq!(mem, "a0_a1");
        assert_eq!(
            intervals,
            &vec![
                OccupancyInterval { start_step: 0, end_step: 1, max_tokens: 4 },
                OccupancyInterval { start_step: 2, end_step: 3, max_tokens: 2 },
            ]
        );
    }

    #[test]
    fn coarse_interval_spans_all_accesses() {
        let t = ping_pong_trace();
        let schedule = t.asap_schedule();
        let per_mem = t.occupancy_intervals_coarse(&schedule);
        let (_, intervals) = &per_mem[0];
        assert_eq!(
            intervals,
            &vec![OccupancyInterval { start_step: 0, end_step: 3, max_tokens: 4 }]
        );
    }

    #[test]
    fn interval_overlap_is_symmetric() {
        let a = OccupancyInterval { start_step: 0, end_step: 2, max_tokens: 1 };
        let b = OccupancyInterval { start_step: 2, end_step: 5, max_tokens: 1 };
        let c = OccupancyInterval { start_step: 3, end_step: 4, max_tokens: 1 };
        assert!(a.overlaps(&b) && b.overlaps(&a)); // shared endpoint counts
        assert!(!a.overlaps(&c) && !c.overlaps(&a));
        assert!(b.overlaps(&c)); // containment
    }

    #[test]
    fn memory_names_keep_first_access_order() {
        let mut t = SimTrace::new();
        t.add_access(access("a1", 0, "a1_a2", MemAction::Write, 1));
        t.add_access(access("a0", 0, "a0_a1", MemAction::Write, 1));
        t.add_access(access("a1", 1, "a1_a2", MemAction::Write, 1));
        assert_eq!(t.memory_names(), vec!["a1_a2", "a0_a1"]);
    }

    #[test]
    fn proc_time_is_last_job_end() {
        let t = ping_pong_trace();
        assert_eq!(t.proc_time("proc0"), 4.0);
        assert_eq!(t.proc_time("proc1"), 0.0);
    }
}
