//! Arrival generators.
//!
//! A generator holds for each inter-arrival gap, then spawns one customer.
//! Once the input runs out the run stops as soon as the last customer has
//! left.

use rand::rngs::StdRng;
use rand_distr::{Distribution, Exp};
use tracing::info;

use scalesim_core::config::ArrivalConfig;
use scalesim_core::trace::{ArrivalRecord, ArrivalTrace};
use scalesim_core::{RngStream, SimConfig, SimError, SimResult, SimTime, stream_rng};
use scalesim_engine::{Context, Process, Yield};
use scalesim_metrics::Metric;

use crate::context::SimContext;
use crate::customer::Customer;

type RecordStream = Box<dyn Iterator<Item = SimResult<ArrivalRecord>>>;

/// Exponential inter-arrival and service times.
pub struct PoissonArrivals {
    rng: StdRng,
    inter_arrival: Exp<f64>,
    service: Exp<f64>,
    max_customers: Option<u64>,
    drawn: u64,
    /// Redraw budget when service regeneration is enabled.
    regenerate: Option<u32>,
}

impl PoissonArrivals {
    pub fn new(lambda: f64, mu: f64, rng: StdRng) -> SimResult<Self> {
        Ok(Self {
            rng,
            inter_arrival: Exp::new(lambda)
                .map_err(|e| SimError::Config(format!("arrival rate {lambda}: {e}")))?,
            service: Exp::new(mu).map_err(|e| SimError::Config(format!("service rate {mu}: {e}")))?,
            max_customers: None,
            drawn: 0,
            regenerate: None,
        })
    }

    pub fn with_max_customers(mut self, max: Option<u64>) -> Self {
        self.max_customers = max;
        self
    }

    /// Redraw service times that would end before the next tick, at most
    /// `budget` times per customer.
    pub fn with_regeneration(mut self, budget: u32) -> Self {
        self.regenerate = Some(budget.max(1));
        self
    }

    fn next_gap(&mut self) -> Option<SimTime> {
        if self.max_customers.is_some_and(|max| self.drawn >= max) {
            return None;
        }
        self.drawn += 1;
        Some(self.inter_arrival.sample(&mut self.rng))
    }

    /// Draw a service time. The flag reports whether it was redrawn.
    fn service_time(&mut self, until_next_tick: Option<SimTime>) -> SimResult<(SimTime, bool)> {
        let first = self.service.sample(&mut self.rng);
        let (Some(budget), Some(until)) = (self.regenerate, until_next_tick) else {
            return Ok((first, false));
        };
        let mut service = first;
        let mut attempts = 0;
        while service < until {
            if attempts == budget {
                return Err(SimError::ResampleBudgetExceeded {
                    what: "service time",
                    attempts,
                });
            }
            attempts += 1;
            service = self.service.sample(&mut self.rng);
        }
        Ok((service, attempts > 0))
    }
}

pub enum ArrivalSource {
    Poisson(PoissonArrivals),
    /// Replayed `(inter_arrival, service)` rows.
    Trace {
        records: RecordStream,
        pending_service: Option<SimTime>,
    },
}

impl ArrivalSource {
    pub fn from_config(config: &SimConfig) -> SimResult<Self> {
        Ok(match &config.arrivals {
            ArrivalConfig::Poisson {
                lambda,
                mu,
                max_customers,
                regenerate_service,
                resample_budget,
            } => {
                let mut poisson =
                    PoissonArrivals::new(*lambda, *mu, stream_rng(config.run.seed, RngStream::Arrivals))?
                        .with_max_customers(*max_customers);
                if *regenerate_service {
                    poisson = poisson.with_regeneration(*resample_budget);
                }
                ArrivalSource::Poisson(poisson)
            }
            ArrivalConfig::Trace { path } => {
                ArrivalSource::trace(Box::new(ArrivalTrace::open(&config.resolve(path))?))
            }
        })
    }

    pub fn trace(records: RecordStream) -> Self {
        ArrivalSource::Trace {
            records,
            pending_service: None,
        }
    }

    fn next_gap(&mut self) -> SimResult<Option<SimTime>> {
        match self {
            ArrivalSource::Poisson(poisson) => Ok(poisson.next_gap()),
            ArrivalSource::Trace {
                records,
                pending_service,
            } => match records.next().transpose()? {
                Some(record) => {
                    *pending_service = Some(record.service);
                    Ok(Some(record.inter_arrival))
                }
                None => Ok(None),
            },
        }
    }

    fn service_time(&mut self, until_next_tick: Option<SimTime>) -> SimResult<(SimTime, bool)> {
        match self {
            ArrivalSource::Poisson(poisson) => poisson.service_time(until_next_tick),
            ArrivalSource::Trace {
                pending_service, ..
            } => pending_service
                .take()
                .map(|service| (service, false))
                .ok_or_else(|| SimError::Config("arrival trace row without service time".into())),
        }
    }
}

/// Process that turns an [`ArrivalSource`] into customers.
pub struct ArrivalGenerator {
    source: ArrivalSource,
    scale_rate: SimTime,
    /// The current hold ends with an arrival.
    pending: bool,
    spawned: u64,
}

impl ArrivalGenerator {
    pub fn new(source: ArrivalSource, scale_rate: SimTime) -> Self {
        Self {
            source,
            scale_rate,
            pending: false,
            spawned: 0,
        }
    }

    fn arrive(&mut self, world: &mut SimContext, ctx: &mut Context<'_, SimContext>) -> SimResult<()> {
        let now = ctx.now();
        world.observe(Metric::Arrival, 1.0, now);

        let until_next_tick = world.time_until_next_tick(now, self.scale_rate);
        let (service, regenerated) = self.source.service_time(until_next_tick)?;
        if service < 0.0 || service.is_nan() {
            return Err(SimError::NegativeSample {
                what: "service time",
                value: service,
            });
        }
        if regenerated {
            world.record_regenerated_service();
        }

        world.record_arrival();
        world.customer_entered();
        let id = world.next_customer_id();
        ctx.spawn(Box::new(Customer::new(id, service)), 0.0);
        self.spawned += 1;
        Ok(())
    }
}

impl Process<SimContext> for ArrivalGenerator {
    fn name(&self) -> &str {
        "arrival-generator"
    }

    fn resume(&mut self, world: &mut SimContext, ctx: &mut Context<'_, SimContext>) -> SimResult<Yield> {
        if self.pending {
            self.pending = false;
            self.arrive(world, ctx)?;
        }
        match self.source.next_gap()? {
            Some(gap) => {
                if gap < 0.0 || gap.is_nan() {
                    return Err(SimError::NegativeSample {
                        what: "inter-arrival time",
                        value: gap,
                    });
                }
                self.pending = true;
                Ok(Yield::Hold(gap))
            }
            None => {
                info!(now = ctx.now(), customers = self.spawned, "arrival input exhausted");
                if world.close_input() {
                    ctx.request_stop();
                }
                Ok(Yield::Done)
            }
        }
    }
}
