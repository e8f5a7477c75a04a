use std::collections::BTreeMap;

use serde::Serialize;

use crate::{
    db::TenantStore,
    domain::{CounterColumn, LoadClass, PeriodKind},
    error::Error,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartPoint {
    pub time: &'static str,
    pub value: i64,
}

/// Current bucket values for one interval, per load class and combined.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsumptionHistory {
    pub interval: PeriodKind,
    pub labels: Vec<&'static str>,
    pub series: BTreeMap<LoadClass, Vec<ChartPoint>>,
    pub total: Vec<ChartPoint>,
}

/// Period total per load class for one interval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsumptionSummary {
    pub interval: PeriodKind,
    pub data: BTreeMap<LoadClass, i64>,
}

/// Sum each of the interval's bucket columns across sockets, per load class.
pub async fn history(store: &dyn TenantStore, interval: PeriodKind) -> Result<ConsumptionHistory, Error> {
    let columns = interval.bucket_columns();
    let labels: Vec<&'static str> = columns.iter().filter_map(|c| c.label()).collect();

    let mut series = BTreeMap::new();
    let mut totals = vec![0i64; columns.len()];

    for load_class in LoadClass::ALL {
        let sums = store.sum_columns(load_class, &columns).await?;
        for (total, value) in totals.iter_mut().zip(&sums) {
            *total = total.saturating_add(*value);
        }
        series.insert(load_class, points(&labels, &sums));
    }

    Ok(ConsumptionHistory {
        interval,
        total: points(&labels, &totals),
        labels,
        series,
    })
}

pub async fn summary(store: &dyn TenantStore, interval: PeriodKind) -> Result<ConsumptionSummary, Error> {
    let column = [CounterColumn::Total(interval.summary_total())];

    let mut data = BTreeMap::new();
    for load_class in LoadClass::ALL {
        let sums = store.sum_columns(load_class, &column).await?;
        data.insert(load_class, sums.first().copied().unwrap_or(0));
    }

    Ok(ConsumptionSummary { interval, data })
}

fn points(labels: &[&'static str], values: &[i64]) -> Vec<ChartPoint> {
    labels
        .iter()
        .zip(values)
        .map(|(time, value)| ChartPoint {
            time: *time,
            value: *value,
        })
        .collect()
}
