//! Per-channel signal model: baseline, diurnal curve, spikes, and gaps.

use std::f64::consts::PI;

use common::config::SynthConfig;
use common::time::{MS_PER_HOUR, MS_PER_SECOND};
use common::{Channel, Metric};

use crate::rng::{hash_site, XorShift32};

const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

/// Rare-event multiplier for gas channels.
#[derive(Debug, Clone, Copy)]
struct Spike {
    /// Probability of a large excursion; a mild bump is 9× as likely.
    p: f64,
    max_mult: f64,
    mild: f64,
}

impl Spike {
    fn draw(&self, rng: &mut XorShift32) -> f64 {
        let u = rng.next_f64();
        let v = rng.next_f64();
        if u < self.p {
            self.mild + v * (self.max_mult - self.mild)
        } else if u < self.p * 10.0 {
            1.0 + v * (self.mild - 1.0)
        } else {
            1.0 + (v - 0.5) * 0.05
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Shaping {
    /// Random walk only.
    Flat,
    /// `walk + amplitude · daylight`.
    Additive { amplitude: f64 },
    /// `walk · (1 + gain · daylight) · spike`.
    Multiplicative { gain: f64, spike: Spike },
}

#[derive(Debug, Clone, Copy)]
struct ChannelModel {
    metric: Metric,
    baseline: (f64, f64),
    step: f64,
    min: f64,
    max: f64,
    shaping: Shaping,
}

const TH_MODELS: [ChannelModel; 6] = [
    ChannelModel {
        metric: Metric::Pm25,
        baseline: (8.0, 33.0),
        step: 1.3,
        min: 0.0,
        max: 500.0,
        shaping: Shaping::Flat,
    },
    ChannelModel {
        metric: Metric::Pm10,
        baseline: (15.0, 60.0),
        step: 1.8,
        min: 0.0,
        max: 600.0,
        shaping: Shaping::Flat,
    },
    ChannelModel {
        metric: Metric::Temperature,
        baseline: (18.0, 28.0),
        step: 0.3,
        min: -20.0,
        max: 55.0,
        shaping: Shaping::Additive { amplitude: 6.0 },
    },
    ChannelModel {
        metric: Metric::Humidity,
        baseline: (40.0, 80.0),
        step: 1.0,
        min: 0.0,
        max: 100.0,
        shaping: Shaping::Additive { amplitude: -15.0 },
    },
    ChannelModel {
        metric: Metric::Noise,
        baseline: (42.0, 52.0),
        step: 1.2,
        min: 20.0,
        max: 90.0,
        shaping: Shaping::Additive { amplitude: 8.0 },
    },
    ChannelModel {
        metric: Metric::Illumination,
        baseline: (20.0, 60.0),
        step: 25.0,
        min: 0.0,
        max: 2000.0,
        shaping: Shaping::Additive { amplitude: 1200.0 },
    },
];

const VOC_MODELS: [ChannelModel; 4] = [
    ChannelModel {
        metric: Metric::Voc,
        baseline: (0.12, 0.20),
        step: 0.004,
        min: 0.0,
        max: 5.0,
        shaping: Shaping::Multiplicative {
            gain: 0.15,
            spike: Spike {
                p: 0.004,
                max_mult: 6.0,
                mild: 1.6,
            },
        },
    },
    ChannelModel {
        metric: Metric::O3,
        baseline: (0.03, 0.06),
        step: 0.002,
        min: 0.0,
        max: 1.0,
        shaping: Shaping::Multiplicative {
            gain: 0.6,
            spike: Spike {
                p: 0.002,
                max_mult: 3.0,
                mild: 1.3,
            },
        },
    },
    ChannelModel {
        metric: Metric::So2,
        baseline: (0.01, 0.02),
        step: 0.001,
        min: 0.0,
        max: 1.0,
        shaping: Shaping::Multiplicative {
            gain: 0.1,
            spike: Spike {
                p: 0.003,
                max_mult: 8.0,
                mild: 1.8,
            },
        },
    },
    ChannelModel {
        metric: Metric::No2,
        baseline: (0.02, 0.04),
        step: 0.0015,
        min: 0.0,
        max: 1.0,
        shaping: Shaping::Multiplicative {
            gain: -0.2,
            spike: Spike {
                p: 0.0025,
                max_mult: 4.0,
                mild: 1.5,
            },
        },
    },
];

fn models(channel: Channel) -> &'static [ChannelModel] {
    match channel {
        Channel::Th => &TH_MODELS,
        Channel::Voc => &VOC_MODELS,
    }
}

fn lerp(lo: f64, hi: f64, t: f64) -> f64 {
    lo + (hi - lo) * t
}

/// Smooth 0..1 day/night factor: one peak near local noon, zero at night.
pub fn daylight(ts_ms: i64, phase_hours: f64) -> f64 {
    let hour = ts_ms.rem_euclid(MS_PER_DAY) as f64 / MS_PER_HOUR as f64;
    let angle = 2.0 * PI * (hour + phase_hours) / 24.0;
    (angle - PI / 2.0).sin().max(0.0).powf(1.5)
}

/// One generated step.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub ts_ms: i64,
    /// Values in `Channel::metrics()` order.
    pub values: Vec<(Metric, f64)>,
    /// Missed transmission; contributes no row.
    pub dropped: bool,
    pub received_ms: i64,
}

impl Sample {
    pub fn value(&self, metric: Metric) -> Option<f64> {
        self.values
            .iter()
            .find(|(m, _)| *m == metric)
            .map(|(_, v)| *v)
    }

    /// Fixed-precision text for a metric (2 or 4 decimals).
    pub fn formatted(&self, metric: Metric) -> Option<String> {
        self.value(metric)
            .map(|v| format!("{:.*}", metric.decimals(), v))
    }
}

/// Generator state for one site. Owned by a single generation call.
#[derive(Debug, Clone)]
pub struct SiteSignal {
    channel: Channel,
    rng: XorShift32,
    walk: Vec<f64>,
    phase_hours: f64,
    drop_rate: f64,
    max_delay_ms: i64,
}

impl SiteSignal {
    pub fn new(site: &str, channel: Channel, config: &SynthConfig) -> Self {
        let seed = hash_site(site);
        let t = f64::from(seed % 100) / 100.0;
        let walk = models(channel)
            .iter()
            .map(|m| lerp(m.baseline.0, m.baseline.1, t))
            .collect();
        let phase_hours = f64::from((seed >> 16) % 200) / 100.0 - 1.0;

        Self {
            channel,
            rng: XorShift32::new(seed),
            walk,
            phase_hours,
            drop_rate: config.drop_rate,
            max_delay_ms: config.max_receive_delay_secs as i64 * MS_PER_SECOND,
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Advance one step. The walk advances even on dropped steps.
    pub fn step(&mut self, ts_ms: i64) -> Sample {
        let light = daylight(ts_ms, self.phase_hours);
        let mut values = Vec::with_capacity(self.walk.len());

        for (state, model) in self.walk.iter_mut().zip(models(self.channel)) {
            let walked =
                (*state + (self.rng.next_f64() - 0.5) * model.step).clamp(model.min, model.max);
            *state = walked;

            let shaped = match model.shaping {
                Shaping::Flat => walked,
                Shaping::Additive { amplitude } => walked + amplitude * light,
                Shaping::Multiplicative { gain, spike } => {
                    walked * (1.0 + gain * light) * spike.draw(&mut self.rng)
                }
            };
            values.push((model.metric, shaped.clamp(model.min, model.max)));
        }

        let dropped = self.rng.next_f64() < self.drop_rate;
        let delay_ms = (self.rng.next_f64() * self.max_delay_ms as f64) as i64;
        let received_ms = ts_ms + delay_ms - delay_ms.rem_euclid(MS_PER_SECOND);

        Sample {
            ts_ms,
            values,
            dropped,
            received_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOON_UTC: i64 = 1_740_830_400_000; // 2025-03-01 12:00:00
    const MIDNIGHT_UTC: i64 = NOON_UTC - 12 * MS_PER_HOUR;

    #[test]
    fn test_daylight_peaks_midday() {
        assert!((daylight(NOON_UTC, 0.0) - 1.0).abs() < 1e-9);
        assert_eq!(daylight(MIDNIGHT_UTC, 0.0), 0.0);
        assert_eq!(daylight(MIDNIGHT_UTC + 4 * MS_PER_HOUR, 0.0), 0.0);
        let morning = daylight(MIDNIGHT_UTC + 9 * MS_PER_HOUR, 0.0);
        assert!(morning > 0.0 && morning < 1.0, "morning={}", morning);
    }

    #[test]
    fn test_baselines_follow_seed_mod_100() {
        let cfg = SynthConfig::default();
        for n in 1..=20 {
            let site = format!("UTIS{:04}-TH-V6_1", n);
            let t = f64::from(hash_site(&site) % 100) / 100.0;
            let signal = SiteSignal::new(&site, Channel::Th, &cfg);
            let temperature = signal.walk[2];
            assert!((temperature - lerp(18.0, 28.0, t)).abs() < 1e-9, "{}: {}", site, temperature);
            assert!((signal.walk[0] - lerp(8.0, 33.0, t)).abs() < 1e-9, "{}", site);
        }
    }

    #[test]
    fn test_same_site_same_samples() {
        let cfg = SynthConfig::default();
        let mut a = SiteSignal::new("UTIS0001-TH-V6_1", Channel::Th, &cfg);
        let mut b = SiteSignal::new("UTIS0001-TH-V6_1", Channel::Th, &cfg);
        for i in 0..50 {
            let ts = NOON_UTC + i * 300_000;
            assert_eq!(a.step(ts), b.step(ts));
        }
    }

    #[test]
    fn test_values_stay_in_physical_bounds() {
        let cfg = SynthConfig::default();
        for channel in Channel::ALL {
            let mut signal = SiteSignal::new("UTIS0007-X-V6_1", channel, &cfg);
            for i in 0..2_000 {
                let sample = signal.step(MIDNIGHT_UTC + i * 300_000);
                for (metric, model) in sample.values.iter().zip(models(channel)) {
                    assert_eq!(metric.0, model.metric);
                    assert!(
                        metric.1 >= model.min && metric.1 <= model.max,
                        "{} = {} outside [{}, {}]",
                        metric.0,
                        metric.1,
                        model.min,
                        model.max
                    );
                }
            }
        }
    }

    #[test]
    fn test_receive_delay_is_bounded_and_whole_seconds() {
        let cfg = SynthConfig::default();
        let mut signal = SiteSignal::new("UTIS0002-VOC-V6_1", Channel::Voc, &cfg);
        for i in 0..500 {
            let ts = NOON_UTC + i * 300_000;
            let sample = signal.step(ts);
            let delay = sample.received_ms - ts;
            assert!((0..90_000).contains(&delay), "delay={}", delay);
            assert_eq!(delay % 1_000, 0);
        }
    }

    #[test]
    fn test_illumination_follows_the_sun() {
        let cfg = SynthConfig::default();
        let mut signal = SiteSignal::new("UTIS0004-TH-V6_1", Channel::Th, &cfg);
        let night = signal.step(MIDNIGHT_UTC).value(Metric::Illumination).unwrap();
        let mut day_signal = SiteSignal::new("UTIS0004-TH-V6_1", Channel::Th, &cfg);
        let day = day_signal.step(NOON_UTC).value(Metric::Illumination).unwrap();
        assert!(day > night + 500.0, "day={} night={}", day, night);
    }

    #[test]
    fn test_fixed_precision_formatting() {
        let sample = Sample {
            ts_ms: 0,
            values: vec![(Metric::Temperature, 21.456), (Metric::O3, 0.031_26)],
            dropped: false,
            received_ms: 0,
        };
        assert_eq!(sample.formatted(Metric::Temperature).as_deref(), Some("21.46"));
        assert_eq!(sample.formatted(Metric::O3).as_deref(), Some("0.0313"));
        assert_eq!(sample.formatted(Metric::Voc), None);
    }

    #[test]
    fn test_spikes_are_rare_but_present() {
        let spike = Spike {
            p: 0.004,
            max_mult: 6.0,
            mild: 1.6,
        };
        let mut rng = XorShift32::new(42);
        let draws: Vec<f64> = (0..100_000).map(|_| spike.draw(&mut rng)).collect();
        let large = draws.iter().filter(|m| **m >= 1.6).count();
        let jitter = draws.iter().filter(|m| (0.975..=1.025).contains(*m)).count();
        assert!(large > 200 && large < 700, "large={}", large);
        assert!(jitter > 94_000, "jitter={}", jitter);
    }
}
