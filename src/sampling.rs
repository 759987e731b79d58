use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

pub struct RateSampler {
    per_minute: u64,
    state: Mutex<SamplerWindow>,
}

struct SamplerWindow {
    minute_bucket: u64,
    sampled: u64,
}

impl RateSampler {
    pub fn new(per_minute: u64) -> Self {
        Self {
            per_minute,
            state: Mutex::new(SamplerWindow {
                minute_bucket: current_epoch_seconds() / 60,
                sampled: 0,
            }),
        }
    }

    pub fn allow(&self) -> bool {
        self.allow_at_epoch_seconds(current_epoch_seconds())
    }

    fn allow_at_epoch_seconds(&self, epoch_seconds: u64) -> bool {
        let minute_bucket = epoch_seconds / 60;
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if state.minute_bucket != minute_bucket {
            state.minute_bucket = minute_bucket;
            state.sampled = 0;
        }

        if state.sampled >= self.per_minute {
            return false;
        }

        state.sampled += 1;
        true
    }
}

fn current_epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}
