#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use meetup_backend::{
    config::{Config, MatchingConfig},
    database::{GroupStore, MemoryGroupStore, NewGroup},
    error::AppError,
    location::{Confidence, Coordinates, LocationSource, NormalizedLocation},
    matching::Matchmaker,
    membership::MembershipLedger,
    notify::{GroupNotification, Notifier},
    realtime::ChangeBus,
    venue::{BusinessStatus, VenueCandidate, VenueProvider},
};
use tokio::sync::mpsc::{self, UnboundedReceiver};

/// 记录所有通知，便于断言
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<GroupNotification>>,
}

impl RecordingNotifier {
    pub fn all(&self) -> Vec<GroupNotification> {
        self.events.lock().unwrap().clone()
    }

    pub fn filled_count(&self, group_id: &str) -> usize {
        self.all()
            .iter()
            .filter(|n| {
                matches!(n, GroupNotification::GroupFilled { group_id: g } if g == group_id)
            })
            .count()
    }

    pub fn cancelled_count(&self, group_id: &str) -> usize {
        self.all()
            .iter()
            .filter(|n| {
                matches!(n, GroupNotification::GroupCancelled { group_id: g } if g == group_id)
            })
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: GroupNotification) {
        self.events.lock().unwrap().push(notification);
    }
}

/// 返回固定候选的场地服务，可以设置前几次调用失败
pub struct FakeVenueProvider {
    candidates: Vec<VenueCandidate>,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
}

impl FakeVenueProvider {
    pub fn new(candidates: Vec<VenueCandidate>) -> Arc<Self> {
        Self::failing(candidates, 0)
    }

    pub fn failing(candidates: Vec<VenueCandidate>, failures: usize) -> Arc<Self> {
        Arc::new(Self {
            candidates,
            failures_left: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VenueProvider for FakeVenueProvider {
    async fn search(
        &self,
        _center: Coordinates,
        _radius_m: f64,
    ) -> Result<Vec<VenueCandidate>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(AppError::Provider("upstream unavailable".into()));
        }
        Ok(self.candidates.clone())
    }
}

pub fn candidate(place_id: &str, name: &str, categories: &[&str]) -> VenueCandidate {
    VenueCandidate {
        place_id: place_id.to_string(),
        name: Some(name.to_string()),
        formatted_address: Some("Torstrasse 12, 10119 Berlin".into()),
        coordinates: Some(Coordinates {
            latitude: 52.5290,
            longitude: 13.4010,
        }),
        categories: categories.iter().map(|c| c.to_string()).collect(),
        rating: Some(4.4),
        business_status: Some(BusinessStatus::Operational),
    }
}

pub fn mitte() -> Coordinates {
    Coordinates {
        latitude: 52.5200,
        longitude: 13.4050,
    }
}

pub fn located(latitude: f64, longitude: f64, confidence: Confidence) -> NormalizedLocation {
    NormalizedLocation {
        coordinates: Coordinates {
            latitude,
            longitude,
        },
        confidence,
        source: LocationSource::Reported,
    }
}

pub struct Harness {
    pub store: Arc<MemoryGroupStore>,
    pub bus: Arc<ChangeBus>,
    pub notifier: Arc<RecordingNotifier>,
    pub ledger: Arc<MembershipLedger>,
    pub matchmaker: Arc<Matchmaker>,
    pub filled_rx: UnboundedReceiver<String>,
    pub config: Config,
}

pub fn harness() -> Harness {
    let config = Config::for_tests();
    let store = Arc::new(MemoryGroupStore::new());
    let bus = Arc::new(ChangeBus::new(64));
    let notifier = Arc::new(RecordingNotifier::default());
    let (filled_tx, filled_rx) = mpsc::unbounded_channel();

    let dyn_store: Arc<dyn GroupStore> = store.clone();
    let ledger = Arc::new(
        MembershipLedger::new(dyn_store, bus.clone(), notifier.clone())
            .with_filled_channel(filled_tx),
    );
    let matchmaker = Arc::new(Matchmaker::new(ledger.clone(), MatchingConfig::default()));

    Harness {
        store,
        bus,
        notifier,
        ledger,
        matchmaker,
        filled_rx,
        config,
    }
}

impl Harness {
    /// 创建一个由 founder 发起的群组，返回群组ID
    pub async fn group_founded_by(&self, founder: &str) -> String {
        let group = NewGroup {
            center: mitte(),
            capacity: 5,
            search_radius: 1_500.0,
        };
        self.ledger
            .found_group(group, founder, mitte())
            .await
            .unwrap()
            .group
            .group_id
    }

    /// 让 count 个用户依次加入（包括 founder 共 count+1 人）
    pub async fn fill_with(&self, group_id: &str, prefix: &str, count: usize) {
        for i in 0..count {
            self.ledger
                .join(group_id, &format!("{}-{}", prefix, i), mitte())
                .await
                .unwrap();
        }
    }
}
