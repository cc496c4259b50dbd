use std::{fmt, sync::Arc};

use rankmeter_core::batch::{
    BatchRunCoordinator, CoordinatorConfig, HousekeeperConfig, RunHousekeeper,
};
use rankmeter_core::credits::CreditLedger;
use rankmeter_core::database::Stores;
use rankmeter_core::probe::ProberRegistry;
use rankmeter_core::schedule::{DispatcherConfig, ScheduleDispatcher, ScheduleService};
use rankmeter_core::summary::SummaryAggregator;

/// Services shared by every handler and background loop.
#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    pub ledger: CreditLedger,
    pub coordinator: Arc<BatchRunCoordinator>,
    pub schedules: ScheduleService,
    pub aggregator: Arc<SummaryAggregator>,
    pub dispatcher: Arc<ScheduleDispatcher>,
    pub housekeeper: Arc<RunHousekeeper>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServiceSettings {
    pub coordinator: CoordinatorConfig,
    pub housekeeper: HousekeeperConfig,
    pub dispatcher: DispatcherConfig,
}

impl AppState {
    pub fn new(stores: Stores, probers: ProberRegistry, settings: ServiceSettings) -> Self {
        let ledger = CreditLedger::new(stores.ledger.clone());
        let schedules = ScheduleService::new(stores.schedules.clone())
            .with_max_items(settings.coordinator.max_items_per_run);
        let aggregator = Arc::new(SummaryAggregator::new(
            stores.runs.clone(),
            stores.summaries.clone(),
        ));
        let coordinator = Arc::new(
            BatchRunCoordinator::new(
                ledger.clone(),
                stores.runs.clone(),
                probers,
                settings.coordinator,
            )
            .with_summaries(aggregator.clone()),
        );
        let dispatcher = Arc::new(ScheduleDispatcher::new(
            stores.schedules.clone(),
            coordinator.clone(),
            settings.dispatcher,
        ));
        let housekeeper = Arc::new(RunHousekeeper::new(
            coordinator.clone(),
            stores.runs.clone(),
            settings.housekeeper,
        ));

        Self {
            stores,
            ledger,
            coordinator,
            schedules,
            aggregator,
            dispatcher,
            housekeeper,
        }
    }
}
