use crate::time::Date;

const PRECISION: f64 = 1e-8;

/// The rate that zeroes the net present value of the cashflows plus the terminal value, with
/// exponents measured in years of 365 days. Flows are from the investor's perspective:
/// contributions are negative, the terminal value is positive.
///
/// The root is bracketed on a coarse grid and narrowed by bisection; a Newton pass refines the
/// result when it converges, otherwise the bisected root is returned as is.
pub fn internal_rate_of_return(
    flows: &[(Date, f64)], terminal_date: Date, terminal_value: f64,
) -> Option<f64> {
    let start_date = flows.first()?.0;

    let mut has_negative = terminal_value < 0.0;
    let mut has_positive = terminal_value > 0.0;
    for &(_, amount) in flows {
        has_negative |= amount < 0.0;
        has_positive |= amount > 0.0;
    }
    if !has_negative || !has_positive {
        return None;
    }

    let mut discounted: Vec<(f64, f64)> = flows.iter()
        .map(|&(date, amount)| (years(start_date, date), amount))
        .collect();
    discounted.push((years(start_date, terminal_date), terminal_value));

    let npv = |rate: f64| -> f64 {
        discounted.iter()
            .map(|&(years, amount)| amount / (1.0 + rate).powf(years))
            .sum()
    };

    let (mut low, mut high) = bracket(&npv)?;

    for _ in 0..200 {
        let mid = (low + high) / 2.0;
        if npv(low) * npv(mid) <= 0.0 {
            high = mid;
        } else {
            low = mid;
        }
        if high - low < PRECISION {
            break;
        }
    }
    let bisected = (low + high) / 2.0;

    newton_refine(&npv, bisected).or(Some(bisected))
}

fn years(start: Date, date: Date) -> f64 {
    (date - start).num_days() as f64 / 365.0
}

fn bracket(npv: &impl Fn(f64) -> f64) -> Option<(f64, f64)> {
    let mut low = -0.9999;
    let mut low_value = npv(low);

    let mut rate = -0.9;
    while rate <= 10.0 {
        let value = npv(rate);
        if low_value * value <= 0.0 {
            return Some((low, rate));
        }
        low = rate;
        low_value = value;
        rate += 0.1;
    }

    None
}

fn newton_refine(npv: &impl Fn(f64) -> f64, mut rate: f64) -> Option<f64> {
    for _ in 0..20 {
        let value = npv(rate);
        if value.abs() < PRECISION {
            return Some(rate);
        }

        let step = 1e-6;
        let derivative = (npv(rate + step) - npv(rate - step)) / (2.0 * step);
        if derivative.abs() < f64::EPSILON {
            return None;
        }

        let next = rate - value / derivative;
        if !next.is_finite() || next <= -1.0 {
            return None;
        }
        if (next - rate).abs() < PRECISION {
            return Some(next);
        }
        rate = next;
    }

    None
}
