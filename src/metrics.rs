use std::{
    fmt::Write as _,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::models::Language;

#[derive(Debug, Default)]
struct LanguageCounters {
    submitted_total: AtomicU64,
    started_total: AtomicU64,
    completed_total: AtomicU64,
    failed_total: AtomicU64,
    timed_out_total: AtomicU64,
    redelivered_total: AtomicU64,
}

/// Counters labeled per language, so one runaway language lane is visible in
/// the scrape instead of being averaged into a global total. Queue depth
/// stays global; it tracks submissions that no worker has picked up yet.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    languages: [LanguageCounters; Language::ALL.len()],
    queue_depth: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lane(&self, language: Language) -> &LanguageCounters {
        let index = match language {
            Language::Python => 0,
            Language::JavaScript => 1,
            Language::Cpp => 2,
        };
        &self.languages[index]
    }

    pub fn submitted(&self, language: Language) {
        self.lane(language)
            .submitted_total
            .fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_add(1, Ordering::Relaxed);
    }

    pub fn started(&self, language: Language) {
        self.lane(language)
            .started_total
            .fetch_add(1, Ordering::Relaxed);
        self.decrement_queue_depth();
    }

    pub fn completed(&self, language: Language) {
        self.lane(language)
            .completed_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn failed(&self, language: Language) {
        self.lane(language)
            .failed_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn timed_out(&self, language: Language) {
        self.lane(language)
            .timed_out_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn redelivered(&self, language: Language, count: u64) {
        self.lane(language)
            .redelivered_total
            .fetch_add(count, Ordering::Relaxed);
        self.queue_depth.fetch_add(count, Ordering::Relaxed);
    }

    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();
        self.render_counter(&mut out, "job_submitted_total", |c| &c.submitted_total);
        self.render_counter(&mut out, "job_started_total", |c| &c.started_total);
        self.render_counter(&mut out, "job_completed_total", |c| &c.completed_total);
        self.render_counter(&mut out, "job_failed_total", |c| &c.failed_total);
        self.render_counter(&mut out, "job_timed_out_total", |c| &c.timed_out_total);
        self.render_counter(&mut out, "job_redelivered_total", |c| &c.redelivered_total);
        let _ = writeln!(out, "# TYPE job_queue_depth gauge");
        let _ = writeln!(
            out,
            "job_queue_depth {}",
            self.queue_depth.load(Ordering::Relaxed)
        );
        out
    }

    fn render_counter<'a>(
        &'a self,
        out: &mut String,
        name: &str,
        field: impl Fn(&'a LanguageCounters) -> &'a AtomicU64,
    ) {
        let _ = writeln!(out, "# TYPE {name} counter");
        for language in Language::ALL {
            let value = field(self.lane(language)).load(Ordering::Relaxed);
            let _ = writeln!(out, "{name}{{language=\"{}\"}} {value}", language.as_str());
        }
    }

    fn decrement_queue_depth(&self) {
        let mut current = self.queue_depth.load(Ordering::Relaxed);
        while current > 0 {
            match self.queue_depth.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::MetricsRegistry;
    use crate::models::Language;

    #[test]
    fn queue_depth_does_not_underflow() {
        let metrics = MetricsRegistry::new();
        metrics.started(Language::Python);
        let rendered = metrics.render_prometheus();
        assert!(rendered.contains("job_queue_depth 0"));
    }

    #[test]
    fn counters_are_labeled_per_language() {
        let metrics = MetricsRegistry::new();
        metrics.submitted(Language::Python);
        metrics.submitted(Language::Python);
        metrics.submitted(Language::Cpp);

        let rendered = metrics.render_prometheus();
        assert!(rendered.contains("job_submitted_total{language=\"python\"} 2"));
        assert!(rendered.contains("job_submitted_total{language=\"cpp\"} 1"));
        assert!(rendered.contains("job_submitted_total{language=\"javascript\"} 0"));
        assert!(rendered.contains("job_queue_depth 3"));
    }
}
