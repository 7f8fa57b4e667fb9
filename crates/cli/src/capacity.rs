use collector::{EventBuffer, channel::negotiate_capacity};
use config::Config;
use serde::Serialize;

/// How a channel opened with the current configuration would be sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capacity {
    /// Largest pipe the platform grants, in bytes.
    pub platform: usize,
    /// Platform capacity after the configured bound, in bytes.
    pub channel: usize,
    /// Records the event buffer holds before it is flushed.
    pub buffer_records: usize,
}

pub fn capacity(config: &Config) -> Result<Capacity, collector::Error> {
    let platform = negotiate_capacity()?;
    let channel = config.channel.clamp(platform);
    let buffer = EventBuffer::for_channel(channel)?;
    Ok(Capacity {
        platform,
        channel,
        buffer_records: buffer.capacity(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use collector::wire::RECORD_SIZE;

    #[test]
    fn buffer_fills_half_the_channel() {
        let mut config = Config::new();
        config.channel.capacity = Some(4096);
        let capacity = capacity(&config).unwrap();

        assert!(capacity.channel <= 4096);
        assert!(capacity.channel <= capacity.platform);
        assert_eq!(capacity.buffer_records, capacity.channel / 2 / RECORD_SIZE);
    }

    #[test]
    fn tiny_bound_is_rejected() {
        let mut config = Config::new();
        config.channel.capacity = Some(RECORD_SIZE);
        assert!(matches!(
            capacity(&config),
            Err(collector::Error::CapacityTooSmall(_))
        ));
    }
}
