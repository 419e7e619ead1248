use std::time::Instant;

pub struct Time {
    delta_seconds: f64,
    last_update: Instant,
    start: Instant,
}

impl Time {
    pub fn new() -> Time {
        let now = Instant::now();
        Time {
            delta_seconds: 0.0,
            last_update: now,
            start: now,
        }
    }

    pub fn delta_seconds(&self) -> f32 {
        self.delta_seconds as f32
    }

    pub fn total_seconds(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    pub fn update(&mut self) {
        let delta_time = self.last_update.elapsed();
        self.last_update = Instant::now();

        self.delta_seconds = delta_time.as_secs_f64();
    }
}
