use embassy_time::Duration;

/// Monotonic milliseconds since boot.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Async sleep, injected so retry loops can run against a simulated clock.
#[allow(async_fn_in_trait)]
pub trait Delay {
    async fn delay(&mut self, duration: Duration);
}
