use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, info};

use crate::config::{validate_concurrency, Conventions, OperatorId};
use crate::dedupe::delete::DeletionExecutor;
use crate::dedupe::reconcile::{reconcile, PlanDecision, ReconcileOptions};
use crate::dedupe::report::{RunSummary, TypeReport};
use crate::dedupe::scan::{ScanParams, Scanner};
use crate::schema::EntityTypeDescriptor;
use crate::store::{GraphStore, Reindexer};
use crate::types::Result;

/// Validated parameters of one run.
#[derive(Clone, Debug)]
pub struct RunOptions {
    /// Entity types to process, in report order.
    pub descriptors: Vec<EntityTypeDescriptor>,
    /// Apply confirmed plans; `false` only detects and reports.
    pub auto_fix: bool,
    /// Safety cap per type.
    pub max_records_to_fix: usize,
    /// Delay between the two passes of each type.
    pub sleep_between_passes: Duration,
    /// Per-pass scan inputs shared by every type.
    pub scan: ScanParams,
    /// Worker pool size.
    pub concurrency: usize,
    /// Operator accountable for the run.
    pub operator: OperatorId,
}

/// Fans entity types out over a bounded pool of worker threads.
///
/// Each type runs the full two-pass protocol and its deletion independently;
/// a failure is recorded in that type's report and never stops the others.
pub struct Scheduler<'a> {
    store: &'a dyn GraphStore,
    reindexer: &'a dyn Reindexer,
    conventions: &'a Conventions,
}

impl<'a> Scheduler<'a> {
    /// Creates a scheduler.
    pub fn new(store: &'a dyn GraphStore, reindexer: &'a dyn Reindexer, conventions: &'a Conventions) -> Self {
        Self {
            store,
            reindexer,
            conventions,
        }
    }

    /// Processes every requested type and returns the aggregated summary.
    ///
    /// Only an invalid pool size fails the run as a whole.
    pub fn run(&self, options: &RunOptions) -> Result<RunSummary> {
        let concurrency = validate_concurrency(options.concurrency)?;
        let workers = concurrency.min(options.descriptors.len());
        info!(
            operator = options.operator.as_str(),
            types = options.descriptors.len(),
            workers,
            auto_fix = options.auto_fix,
            "dedupe.run.started"
        );

        let queue: Mutex<VecDeque<(usize, &EntityTypeDescriptor)>> =
            Mutex::new(options.descriptors.iter().enumerate().collect());
        let slots: Mutex<Vec<Option<TypeReport>>> = Mutex::new(vec![None; options.descriptors.len()]);

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let Some((slot, descriptor)) = queue.lock().pop_front() else {
                        break;
                    };
                    let report = self.process_guarded(descriptor, options);
                    slots.lock()[slot] = Some(report);
                });
            }
        });

        let reports: Vec<TypeReport> = slots
            .into_inner()
            .into_iter()
            .zip(&options.descriptors)
            .map(|(report, descriptor)| {
                report.unwrap_or_else(|| TypeReport::failed(descriptor.name.clone(), "worker exited early"))
            })
            .collect();
        let summary = RunSummary::new(options.operator.as_str(), options.auto_fix, reports);
        info!(
            types = summary.types.len(),
            failed = summary.failed_types,
            confirmed = summary.totals.confirmed,
            deleted = summary.totals.deleted,
            undetermined = summary.totals.undetermined,
            "dedupe.run.completed"
        );
        Ok(summary)
    }

    fn process_guarded(&self, descriptor: &EntityTypeDescriptor, options: &RunOptions) -> TypeReport {
        match panic::catch_unwind(AssertUnwindSafe(|| self.process(descriptor, options))) {
            Ok(report) => report,
            Err(_) => {
                error!(entity_type = %descriptor.name, "dedupe.type.panicked");
                TypeReport::failed(descriptor.name.clone(), "worker panicked")
            }
        }
    }

    fn process(&self, descriptor: &EntityTypeDescriptor, options: &RunOptions) -> TypeReport {
        let scanner = Scanner::new(self.store, descriptor, self.conventions);
        let reconcile_options = ReconcileOptions {
            sleep_between_passes: options.sleep_between_passes,
            max_records_to_fix: options.max_records_to_fix,
        };
        let reconciliation = match reconcile(&scanner, &options.scan, &reconcile_options) {
            Ok(reconciliation) => reconciliation,
            Err(err) => {
                error!(entity_type = %descriptor.name, %err, "dedupe.type.failed");
                return TypeReport::failed(descriptor.name.clone(), err.to_string());
            }
        };

        let plan = match &reconciliation.decision {
            PlanDecision::Ready { plan } if options.auto_fix => plan,
            _ => return TypeReport::from_reconciliation(&reconciliation, None),
        };
        let executor = DeletionExecutor::new(self.store, self.reindexer);
        match executor.apply(&descriptor.name, plan, &descriptor.index_name()) {
            Ok(deletion) => TypeReport::from_reconciliation(&reconciliation, Some(&deletion)),
            Err(err) => {
                error!(entity_type = %descriptor.name, %err, "dedupe.type.failed");
                TypeReport::from_reconciliation(&reconciliation, None).with_failure(err.to_string())
            }
        }
    }
}
