use super::system::System;
use crate::core::forcefield::term::Symbol;
use crate::error::{Error, Result};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::Path;

/// Collects statistics from a [`System`] when asked to by
/// [`System::collect_stats`].
pub trait SystemMonitor: fmt::Debug + Send + Sync + 'static {
    fn monitor(&mut self, system: &mut System) -> Result<()>;

    fn clear_statistics(&mut self);

    fn box_clone(&self) -> Box<dyn SystemMonitor>;

    fn as_any(&self) -> &dyn Any;
}

impl Clone for Box<dyn SystemMonitor> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

#[derive(Debug, Clone)]
struct MonitorEntry {
    monitor: Box<dyn SystemMonitor>,
    frequency: u64,
}

/// Named monitors, each run every `frequency` calls to
/// [`Monitors::monitor`].
#[derive(Debug, Clone, Default)]
pub struct Monitors {
    entries: BTreeMap<String, MonitorEntry>,
    step: u64,
}

impl Monitors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of completed collection steps.
    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn add(&mut self, name: impl Into<String>, monitor: impl SystemMonitor, frequency: u64) -> Result<()> {
        self.add_boxed(name, Box::new(monitor), frequency)
    }

    pub fn add_boxed(&mut self, name: impl Into<String>, monitor: Box<dyn SystemMonitor>, frequency: u64) -> Result<()> {
        let name = name.into();
        if frequency == 0 {
            return Err(Error::Incompatible(format!(
                "monitor '{name}' must run at least every step, not every 0"
            )));
        }
        if self.entries.contains_key(&name) {
            return Err(Error::DuplicateMonitor(name));
        }
        self.entries.insert(name, MonitorEntry { monitor, frequency });
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<Box<dyn SystemMonitor>> {
        self.entries
            .remove(name)
            .map(|entry| entry.monitor)
            .ok_or_else(|| Error::MissingMonitor(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Result<&dyn SystemMonitor> {
        self.entries
            .get(name)
            .map(|entry| entry.monitor.as_ref())
            .ok_or_else(|| Error::MissingMonitor(name.to_string()))
    }

    pub fn get_as<M: SystemMonitor>(&self, name: &str) -> Result<&M> {
        self.get(name)?
            .as_any()
            .downcast_ref::<M>()
            .ok_or_else(|| Error::InvalidCast {
                from: format!("monitor '{name}'"),
                to: std::any::type_name::<M>().to_string(),
            })
    }

    pub fn frequency(&self, name: &str) -> Result<u64> {
        self.entries
            .get(name)
            .map(|entry| entry.frequency)
            .ok_or_else(|| Error::MissingMonitor(name.to_string()))
    }

    /// Advances the step counter and runs every monitor due on the new step.
    /// Returns how many ran.
    pub fn monitor(&mut self, system: &mut System) -> Result<usize> {
        self.step += 1;
        let mut ran = 0;
        for entry in self.entries.values_mut() {
            if self.step % entry.frequency == 0 {
                entry.monitor.monitor(system)?;
                ran += 1;
            }
        }
        Ok(ran)
    }

    pub fn clear_statistics(&mut self) {
        for entry in self.entries.values_mut() {
            entry.monitor.clear_statistics();
        }
        self.step = 0;
    }
}

/// Records the value of energy components each time it runs.
#[derive(Debug, Clone, Default)]
pub struct EnergyMonitor {
    components: Vec<Symbol>,
    samples: Vec<BTreeMap<Symbol, f64>>,
}

impl EnergyMonitor {
    /// Records every component the system defines.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_components(components: impl IntoIterator<Item = Symbol>) -> Self {
        Self {
            components: components.into_iter().collect(),
            samples: Vec::new(),
        }
    }

    pub fn samples(&self) -> &[BTreeMap<Symbol, f64>] {
        &self.samples
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    /// Recorded values of one component, `None` where a sample lacks it.
    pub fn series(&self, symbol: &Symbol) -> Vec<Option<f64>> {
        self.samples.iter().map(|s| s.get(symbol).copied()).collect()
    }

    pub fn average(&self, symbol: &Symbol) -> Option<f64> {
        let values: Vec<f64> = self.series(symbol).into_iter().flatten().collect();
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    }

    fn columns(&self) -> Vec<Symbol> {
        let mut columns: Vec<Symbol> = Vec::new();
        for sample in &self.samples {
            for symbol in sample.keys() {
                if !columns.contains(symbol) {
                    columns.push(symbol.clone());
                }
            }
        }
        columns
    }

    /// Writes one row per sample; components missing from a sample are left
    /// empty.
    pub fn write_csv_to<W: io::Write>(&self, writer: W) -> std::result::Result<(), csv::Error> {
        let columns = self.columns();
        let mut csv = csv::Writer::from_writer(writer);

        let mut header = vec!["sample".to_string()];
        header.extend(columns.iter().map(|c| c.to_string()));
        csv.write_record(&header)?;

        for (i, sample) in self.samples.iter().enumerate() {
            let mut row = vec![(i + 1).to_string()];
            row.extend(
                columns
                    .iter()
                    .map(|c| sample.get(c).map(|v| v.to_string()).unwrap_or_default()),
            );
            csv.write_record(&row)?;
        }
        csv.flush()?;
        Ok(())
    }

    pub fn write_csv(&self, path: &Path) -> std::result::Result<(), csv::Error> {
        let file = std::fs::File::create(path)?;
        self.write_csv_to(file)
    }
}

impl SystemMonitor for EnergyMonitor {
    fn monitor(&mut self, system: &mut System) -> Result<()> {
        let sample = if self.components.is_empty() {
            system.energies()?
        } else {
            let mut sample = BTreeMap::new();
            for symbol in &self.components {
                sample.insert(symbol.clone(), system.energy_of(symbol)?);
            }
            sample
        };
        self.samples.push(sample);
        Ok(())
    }

    fn clear_statistics(&mut self) {
        self.samples.clear();
    }

    fn box_clone(&self) -> Box<dyn SystemMonitor> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
