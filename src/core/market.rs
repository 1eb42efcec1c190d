use serde::{Deserialize, Serialize};

use super::rng::Rng;
use super::types::{EventScope, Market, MarketEvent, Neighborhood};

const NO_EVENT_PROBABILITY: f64 = 0.35;

const BASE_RATE_DRIFT: f64 = 0.001;
const BASE_RATE_VOL: f64 = 0.004;
const LIQUIDITY_ANCHOR: f64 = 0.7;
const LIQUIDITY_REVERSION: f64 = 0.25;
const LIQUIDITY_VOL: f64 = 0.05;
const SPREAD_ANCHOR: f64 = 0.025;
const SPREAD_REVERSION: f64 = 0.15;
const SPREAD_LIQUIDITY_PULL: f64 = 0.01;
const SPREAD_VOL: f64 = 0.003;

const DEMAND_REVERSION: f64 = 0.3;
const VACANCY_REVERSION: f64 = 0.35;
const TREND_RENT_GROWTH: f64 = 0.02;
const NEUTRAL_VACANCY: f64 = 0.07;
const TIGHTNESS_WEIGHT: f64 = 0.4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedEvent {
    pub event_id: String,
    pub name: String,
    pub neighborhood_id: Option<String>,
}

/// Moves macro variables one year. Runs before any neighborhood update.
pub fn advance_market(market: &mut Market, rng: &mut Rng) {
    market.base_rate += BASE_RATE_DRIFT + BASE_RATE_VOL * rng.standard_normal();
    market.liquidity += LIQUIDITY_REVERSION * (LIQUIDITY_ANCHOR - market.liquidity)
        + LIQUIDITY_VOL * rng.standard_normal();
    market.liquidity = market.liquidity.clamp(0.2, 1.0);
    market.spread += SPREAD_REVERSION * (SPREAD_ANCHOR - market.spread)
        - SPREAD_LIQUIDITY_PULL * (market.liquidity - LIQUIDITY_ANCHOR)
        + SPREAD_VOL * rng.standard_normal();
    market.clamp_in_place();
}

pub fn demand_implied_vacancy(demand: f64) -> f64 {
    (0.16 - 0.12 * demand).clamp(0.02, 0.30)
}

/// Cap rate justified by the cost and availability of capital.
pub fn implied_cap_rate(market: &Market) -> f64 {
    let implied = 0.02
        + 0.6 * (market.base_rate + market.spread)
        + 0.03 * (1.0 - market.liquidity);
    implied.clamp(0.03, 0.12)
}

pub fn advance_neighborhood(n: &mut Neighborhood, market: &Market, rng: &mut Rng) {
    n.demand += DEMAND_REVERSION * (n.base_demand - n.demand) + rng.noise(0.04);
    n.demand = n.demand.clamp(0.2, 1.2);

    let target_vacancy = demand_implied_vacancy(n.demand);
    n.vacancy += VACANCY_REVERSION * (target_vacancy - n.vacancy) + rng.noise(0.01);
    n.vacancy = n.vacancy.clamp(0.01, 0.35);

    let tightness = (NEUTRAL_VACANCY - n.vacancy) * TIGHTNESS_WEIGHT;
    let rent_growth = TREND_RENT_GROWTH + tightness + rng.noise(0.015);
    n.rent_index *= 1.0 + rent_growth;

    let blend = 0.5 * n.cap_rate + 0.5 * implied_cap_rate(market);
    n.cap_rate += 0.5 * (blend - n.cap_rate) + rng.noise(0.002);

    n.clamp_in_place();
}

pub fn draw_event<'a>(events: &'a [MarketEvent], rng: &mut Rng) -> Option<&'a MarketEvent> {
    if events.is_empty() || rng.chance(NO_EVENT_PROBABILITY) {
        return None;
    }
    events.get(rng.index(events.len()))
}

/// Applies an event's deltas then clamps every touched field.
pub fn apply_event(
    event: &MarketEvent,
    market: &mut Market,
    neighborhoods: &mut [Neighborhood],
    rng: &mut Rng,
) -> AppliedEvent {
    let d = event.deltas;
    let neighborhood_id = match event.scope {
        EventScope::Global => {
            market.base_rate += d.base_rate;
            market.spread += d.spread;
            market.liquidity += d.liquidity;
            market.clamp_in_place();
            None
        }
        EventScope::Neighborhood => {
            let idx = match &event.target {
                Some(target) => neighborhoods.iter().position(|n| &n.id == target),
                None if neighborhoods.is_empty() => None,
                None => Some(rng.index(neighborhoods.len())),
            };
            idx.map(|i| {
                let n = &mut neighborhoods[i];
                n.demand += d.demand;
                n.vacancy += d.vacancy;
                n.rent_index += d.rent_index;
                n.cap_rate += d.cap_rate;
                n.clamp_in_place();
                n.id.clone()
            })
        }
    };

    tracing::debug!(event = %event.id, target = ?neighborhood_id, "market event applied");
    AppliedEvent {
        event_id: event.id.clone(),
        name: event.name.clone(),
        neighborhood_id,
    }
}

pub fn draw_loan_rate(market: &Market, rng: &mut Rng) -> f64 {
    (market.base_rate + market.spread + 0.015 + rng.noise(0.005)).clamp(0.02, 0.18)
}

/// Balloon term: 5y at 45%, 7y at 30%, otherwise 10y.
pub fn draw_balloon_years(rng: &mut Rng) -> u32 {
    let r = rng.next_f64();
    if r < 0.45 {
        5
    } else if r < 0.75 {
        7
    } else {
        10
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::data::ReferenceData;
    use crate::core::types::{
        BASE_RATE_BOUNDS, CAP_RATE_BOUNDS, DEMAND_BOUNDS, EventDeltas, LIQUIDITY_BOUNDS,
        RENT_INDEX_BOUNDS, SPREAD_BOUNDS, VACANCY_BOUNDS,
    };
    use proptest::prelude::{any, prop_assert, proptest};

    fn within(value: f64, bounds: (f64, f64)) -> bool {
        value >= bounds.0 && value <= bounds.1
    }

    fn assert_market_bounds(market: &Market) {
        assert!(within(market.base_rate, BASE_RATE_BOUNDS), "{market:?}");
        assert!(within(market.spread, SPREAD_BOUNDS), "{market:?}");
        assert!(within(market.liquidity, LIQUIDITY_BOUNDS), "{market:?}");
    }

    fn assert_neighborhood_bounds(n: &Neighborhood) {
        assert!(within(n.demand, DEMAND_BOUNDS), "{n:?}");
        assert!(within(n.rent_index, RENT_INDEX_BOUNDS), "{n:?}");
        assert!(within(n.vacancy, VACANCY_BOUNDS), "{n:?}");
        assert!(within(n.cap_rate, CAP_RATE_BOUNDS), "{n:?}");
    }

    fn huge_event(scope: EventScope, sign: f64) -> MarketEvent {
        MarketEvent {
            id: "huge".to_string(),
            name: "Huge shock".to_string(),
            scope,
            target: None,
            deltas: EventDeltas {
                base_rate: sign * 1.0,
                spread: sign * 1.0,
                liquidity: sign * 5.0,
                demand: sign * 5.0,
                vacancy: sign * 5.0,
                rent_index: sign * 5.0,
                cap_rate: sign * 1.0,
            },
        }
    }

    #[test]
    fn balloon_draw_only_yields_known_terms_in_rough_proportion() {
        let mut rng = Rng::new(99);
        let mut counts = [0_u32; 3];
        for _ in 0..4_000 {
            match draw_balloon_years(&mut rng) {
                5 => counts[0] += 1,
                7 => counts[1] += 1,
                10 => counts[2] += 1,
                other => panic!("unexpected balloon term {other}"),
            }
        }
        assert!((1_600..2_000).contains(&counts[0]), "{counts:?}");
        assert!((1_000..1_400).contains(&counts[1]), "{counts:?}");
        assert!((800..1_200).contains(&counts[2]), "{counts:?}");
    }

    #[test]
    fn event_draw_skips_roughly_a_third_of_years() {
        let data = ReferenceData::bundled().expect("bundled data");
        let mut rng = Rng::new(5);
        let none = (0..2_000)
            .filter(|_| draw_event(&data.events, &mut rng).is_none())
            .count();
        assert!((600..800).contains(&none), "no-event count {none}");
    }

    #[test]
    fn targeted_event_only_touches_its_neighborhood() {
        let data = ReferenceData::bundled().expect("bundled data");
        let mut market = Market::default();
        let mut neighborhoods = data.neighborhoods.clone();
        let event = data.event("flood").expect("flood event");
        let before = neighborhoods.clone();

        let applied = apply_event(event, &mut market, &mut neighborhoods, &mut Rng::new(1));
        assert_eq!(applied.neighborhood_id.as_deref(), Some("riverside"));
        for (after, prior) in neighborhoods.iter().zip(&before) {
            if after.id == "riverside" {
                assert!(after.vacancy > prior.vacancy);
                assert!(after.cap_rate > prior.cap_rate);
            } else {
                assert_eq!(after, prior);
            }
        }
        assert_eq!(market, Market::default());
    }

    #[test]
    fn oversized_event_deltas_are_clamped() {
        let data = ReferenceData::bundled().expect("bundled data");
        let mut rng = Rng::new(3);
        for sign in [1.0, -1.0] {
            let mut market = Market::default();
            let mut neighborhoods = data.neighborhoods.clone();
            apply_event(
                &huge_event(EventScope::Global, sign),
                &mut market,
                &mut neighborhoods,
                &mut rng,
            );
            apply_event(
                &huge_event(EventScope::Neighborhood, sign),
                &mut market,
                &mut neighborhoods,
                &mut rng,
            );
            assert_market_bounds(&market);
            neighborhoods.iter().for_each(assert_neighborhood_bounds);
        }
    }

    #[test]
    fn higher_rates_imply_higher_cap_rates() {
        let low = Market {
            base_rate: 0.02,
            spread: 0.01,
            liquidity: 0.8,
        };
        let high = Market {
            base_rate: 0.08,
            spread: 0.04,
            liquidity: 0.4,
        };
        assert!(implied_cap_rate(&high) > implied_cap_rate(&low));
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(48))]

        #[test]
        fn prop_random_event_sequences_keep_every_field_in_bounds(
            seed in any::<u32>(),
            years in 1usize..40,
            scripted in proptest::collection::vec((any::<bool>(), -1.0f64..1.0), 40)
        ) {
            let data = ReferenceData::bundled().expect("bundled data");
            let mut rng = Rng::new(seed);
            let mut market = Market::default();
            let mut neighborhoods = data.neighborhoods.clone();

            for (global, magnitude) in scripted.iter().take(years) {
                advance_market(&mut market, &mut rng);
                assert_market_bounds(&market);

                let scope = if *global { EventScope::Global } else { EventScope::Neighborhood };
                let shock = huge_event(scope, *magnitude);
                apply_event(&shock, &mut market, &mut neighborhoods, &mut rng);
                if let Some(event) = draw_event(&data.events, &mut rng) {
                    apply_event(event, &mut market, &mut neighborhoods, &mut rng);
                }
                assert_market_bounds(&market);

                for n in neighborhoods.iter_mut() {
                    advance_neighborhood(n, &market, &mut rng);
                    prop_assert!(n.demand >= 0.2 && n.demand <= 1.2);
                    prop_assert!(n.vacancy >= 0.01 && n.vacancy <= 0.35);
                    prop_assert!(n.rent_index >= 0.6 && n.rent_index <= 1.8);
                    prop_assert!(n.cap_rate >= 0.03 && n.cap_rate <= 0.12);
                }
            }
        }

        #[test]
        fn prop_loan_rate_draw_is_bounded(
            seed in any::<u32>(),
            base in 0.0f64..0.12,
            spread in 0.0f64..0.08
        ) {
            let market = Market { base_rate: base, spread, liquidity: 0.7 };
            let mut rng = Rng::new(seed);
            let rate = draw_loan_rate(&market, &mut rng);
            prop_assert!((0.02..=0.18).contains(&rate));
        }
    }
}
