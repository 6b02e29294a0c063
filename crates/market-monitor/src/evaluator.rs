//! Alert condition evaluation. Pure; removal is the scheduler's job.

use serde::{Deserialize, Serialize};

use crate::types::{Alert, AlertKind, PriceSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
    Flat,
}

/// A fired alert together with the snapshot that fired it.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub alert: Alert,
    pub snapshot: PriceSnapshot,
    /// Move from the reference price, in percent.
    pub change_percent: f64,
    pub direction: Direction,
}

/// Percent move from `reference` to `price`. `None` for a non-positive reference.
pub fn percent_change(reference: f64, price: f64) -> Option<f64> {
    if reference > 0.0 && reference.is_finite() {
        Some((price - reference) / reference * 100.0)
    } else {
        None
    }
}

/// Decide whether `alert` fires at `snapshot`.
///
/// Percent alerts are direction-agnostic: a fall of the configured magnitude
/// fires just like a rise. Price alerts fire when the price crosses `target`
/// from the side the reference price was on; a target equal to the reference
/// fires on the first read.
pub fn evaluate(alert: &Alert, snapshot: &PriceSnapshot) -> Option<Trigger> {
    if !snapshot.symbol.eq_ignore_ascii_case(&alert.ticker) || !snapshot.price.is_finite() {
        return None;
    }

    let price = snapshot.price;
    let reference = alert.reference_price;

    let fired = match alert.kind {
        AlertKind::Percent => {
            percent_change(reference, price).is_some_and(|change| change.abs() >= alert.target)
        }
        AlertKind::Price => {
            if alert.target > reference {
                price >= alert.target
            } else if alert.target < reference {
                price <= alert.target
            } else {
                true
            }
        }
    };

    if !fired {
        return None;
    }

    let direction = if price > reference {
        Direction::Up
    } else if price < reference {
        Direction::Down
    } else {
        Direction::Flat
    };

    Some(Trigger {
        alert: alert.clone(),
        snapshot: snapshot.clone(),
        change_percent: percent_change(reference, price).unwrap_or(0.0),
        direction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChannelId;
    use chrono::Utc;

    fn alert(kind: AlertKind, target: f64, reference: f64) -> Alert {
        Alert::new(ChannelId(1), "AAPL", kind, target, reference)
    }

    fn snap(price: f64) -> PriceSnapshot {
        PriceSnapshot::new("AAPL", price, Utc::now())
    }

    #[test]
    fn test_percent_alert_is_symmetric() {
        let a = alert(AlertKind::Percent, 5.0, 100.0);

        for (price, expected) in [
            (101.0, false),
            (104.99, false),
            (105.0, true),
            (130.0, true),
            (95.01, false),
            (95.0, true),
            (60.0, true),
        ] {
            assert_eq!(
                evaluate(&a, &snap(price)).is_some(),
                expected,
                "price {price}"
            );
        }
    }

    #[test]
    fn test_percent_trigger_reports_direction() {
        let a = alert(AlertKind::Percent, 5.0, 100.0);
        let down = evaluate(&a, &snap(90.0)).unwrap();
        assert_eq!(down.direction, Direction::Down);
        assert!((down.change_percent - -10.0).abs() < 1e-9);

        let up = evaluate(&a, &snap(106.0)).unwrap();
        assert_eq!(up.direction, Direction::Up);
    }

    #[test]
    fn test_price_alert_above_reference() {
        let a = alert(AlertKind::Price, 150.0, 140.0);
        assert!(evaluate(&a, &snap(149.99)).is_none());
        assert!(evaluate(&a, &snap(150.0)).is_some());
        assert!(evaluate(&a, &snap(120.0)).is_none());
    }

    #[test]
    fn test_price_alert_below_reference() {
        let a = alert(AlertKind::Price, 130.0, 140.0);
        assert!(evaluate(&a, &snap(130.01)).is_none());
        assert!(evaluate(&a, &snap(130.0)).is_some());
        assert!(evaluate(&a, &snap(200.0)).is_none());
    }

    #[test]
    fn test_price_alert_at_reference_fires_immediately() {
        let a = alert(AlertKind::Price, 140.0, 140.0);
        assert!(evaluate(&a, &snap(141.0)).is_some());
    }

    #[test]
    fn test_zero_reference_never_fires_percent() {
        let a = alert(AlertKind::Percent, 5.0, 0.0);
        assert!(evaluate(&a, &snap(10.0)).is_none());
    }

    #[test]
    fn test_other_symbol_ignored() {
        let a = alert(AlertKind::Price, 140.0, 140.0);
        let other = PriceSnapshot::new("MSFT", 140.0, Utc::now());
        assert!(evaluate(&a, &other).is_none());
    }

    #[test]
    fn test_scenario_three_ticks() {
        let a = alert(AlertKind::Percent, 5.0, 100.0);
        let fired: Vec<bool> = [101.0, 104.0, 106.0]
            .iter()
            .map(|p| evaluate(&a, &snap(*p)).is_some())
            .collect();
        assert_eq!(fired, vec![false, false, true]);
    }
}
