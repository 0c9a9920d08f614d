use super::scenario::{Action, ForceFieldSpec, GroupSpec, Scenario, group_id};
use crate::core::forcefield::term::{ComponentValue, Symbol};
use crate::core::groups::base::MolGroupsBase;
use crate::core::groups::molgroup::MoleculeGroup;
use crate::core::models::ids::{MGID, MGNum};
use crate::core::models::molecule::Molecule;
use crate::core::models::property::Property;
use crate::core::models::views::Molecules;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::system::System;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use tracing::{info, instrument, warn};

/// What happened to one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    pub label: String,
    /// `None` when the step succeeded.
    pub error: Option<String>,
    pub major: u64,
    pub minor: u64,
    pub energy: Option<f64>,
}

impl StepRecord {
    pub fn ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct ReplayReport {
    pub system: System,
    pub steps: Vec<StepRecord>,
}

impl ReplayReport {
    pub fn n_failed(&self) -> usize {
        self.steps.iter().filter(|s| !s.ok()).count()
    }

    pub fn write_csv_to<W: io::Write>(&self, writer: W) -> std::result::Result<(), csv::Error> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(["step", "label", "ok", "version", "energy", "error"])?;
        for (i, step) in self.steps.iter().enumerate() {
            csv.write_record([
                (i + 1).to_string(),
                step.label.clone(),
                step.ok().to_string(),
                format!("{}.{}", step.major, step.minor),
                step.energy.map(|e| e.to_string()).unwrap_or_default(),
                step.error.clone().unwrap_or_default(),
            ])?;
        }
        csv.flush()?;
        Ok(())
    }

    pub fn write_csv(&self, path: &Path) -> std::result::Result<(), csv::Error> {
        self.write_csv_to(std::fs::File::create(path)?)
    }
}

/// Latest version of every molecule the scenario declares, by name.
struct Catalogue {
    molecules: BTreeMap<String, Molecule>,
}

impl Catalogue {
    fn get(&self, name: &str) -> Result<&Molecule> {
        self.molecules
            .get(name)
            .ok_or_else(|| Error::MissingMolecule(format!("scenario declares no molecule named '{name}'")))
    }

    fn collect(&self, names: &[String]) -> Result<Molecules> {
        names
            .iter()
            .map(|name| self.get(name).cloned())
            .collect::<Result<Vec<_>>>()
            .map(Molecules::from_iter)
    }
}

/// Builds the scenario's system, then applies each step in turn.
///
/// Set-up errors abort the replay. A failing step is recorded and leaves the
/// system as it was before the step.
#[instrument(skip_all, name = "replay_workflow", fields(system = %scenario.system.name))]
pub fn run(scenario: &Scenario, reporter: &ProgressReporter) -> Result<ReplayReport> {
    reporter.report(Progress::SetupStart);
    let mut catalogue = Catalogue {
        molecules: BTreeMap::new(),
    };
    for spec in &scenario.molecules {
        if catalogue.molecules.contains_key(&spec.name) {
            return Err(Error::DuplicateMolecule(format!(
                "scenario declares molecule '{}' twice",
                spec.name
            )));
        }
        catalogue.molecules.insert(spec.name.clone(), spec.build()?);
    }

    let mut system = System::new(scenario.system.clone());
    for spec in &scenario.groups {
        system.add_group(build_group(spec, &catalogue)?)?;
    }
    for spec in &scenario.forcefields {
        add_forcefield(&mut system, spec, &catalogue)?;
    }
    for spec in &scenario.monitors {
        system.add_monitor(&spec.name, spec.build(), spec.frequency)?;
    }
    for spec in &scenario.constraints {
        system.add_constraint(spec.build())?;
    }
    info!(
        groups = system.n_groups(),
        molecules = system.n_molecules(),
        forcefields = system.forcefields().n_forcefields(),
        "System set up."
    );
    reporter.report(Progress::SetupFinish);

    reporter.report(Progress::ReplayStart {
        total_steps: scenario.steps.len() as u64,
    });
    let mut steps = Vec::with_capacity(scenario.steps.len());
    for step in &scenario.steps {
        reporter.report(Progress::StepStart {
            label: step.label.clone(),
        });
        let error = match apply(&mut system, &mut catalogue, &step.action) {
            Ok(()) => None,
            Err(e) => {
                warn!(step = %step.label, error = %e, "Step failed; system left unchanged.");
                Some(e.to_string())
            }
        };
        let record = StepRecord {
            label: step.label.clone(),
            error,
            major: system.version().major(),
            minor: system.version().minor(),
            energy: system.energy().ok(),
        };
        reporter.report(Progress::StepDone {
            label: record.label.clone(),
            ok: record.ok(),
        });
        steps.push(record);
    }
    reporter.report(Progress::ReplayFinish);

    let report = ReplayReport { system, steps };
    info!(
        steps = report.steps.len(),
        failed = report.n_failed(),
        version = %report.system.version(),
        "Replay complete."
    );
    Ok(report)
}

fn build_group(spec: &GroupSpec, catalogue: &Catalogue) -> Result<MoleculeGroup> {
    let number = spec.number.map(MGNum::new).unwrap_or_else(MGNum::new_unique);
    let mut group = MoleculeGroup::with_number(number, &spec.name);
    group.add(catalogue.collect(&spec.molecules)?);
    Ok(group)
}

fn add_forcefield(system: &mut System, spec: &ForceFieldSpec, catalogue: &Catalogue) -> Result<()> {
    let mut ff = spec.build()?;
    let molecules = catalogue.collect(&spec.molecules)?;
    if !molecules.is_empty() {
        ff.add(&molecules, &MGID::All)?;
    }
    system.add_forcefield(ff)
}

fn apply(system: &mut System, catalogue: &mut Catalogue, action: &Action) -> Result<()> {
    match action {
        Action::Add {
            molecules,
            groups,
            unique,
        } => {
            let molecules = catalogue.collect(molecules)?;
            if *unique {
                system.add_if_unique(&molecules, &group_id(groups))?;
            } else {
                system.add(&molecules, &group_id(groups))?;
            }
        }
        Action::Remove {
            molecules,
            groups,
            all,
        } => {
            let molecules = catalogue.collect(molecules)?;
            if *all {
                system.remove_all(&molecules, &group_id(groups))?;
            } else {
                system.remove(&molecules, &group_id(groups))?;
            }
        }
        Action::Clear { groups } => {
            system.clear_groups(&group_id(groups))?;
        }
        Action::SetContents { molecules, groups } => {
            let molecules = catalogue.collect(molecules)?;
            system.set_contents(&group_id(groups), &molecules)?;
        }
        Action::Update {
            molecule,
            property,
            value,
        } => {
            let current = match system.molecule(catalogue.get(molecule)?.number()) {
                Ok(resident) => resident.molecule().clone(),
                Err(Error::MissingMolecule(_)) => catalogue.get(molecule)?.clone(),
                Err(e) => return Err(e),
            };
            let updated = current.with_property(property.as_str(), Property::from(value))?;
            system.update(&Molecules::from(updated.clone()))?;
            catalogue.molecules.insert(molecule.clone(), updated);
        }
        Action::SetComponent { component, value } => {
            system.set_component(Symbol::new(component.as_str()), ComponentValue::from(value))?;
        }
        Action::SetProperty {
            forcefield,
            property,
            value,
        } => {
            let value = Property::from(value);
            match forcefield {
                Some(ff) => system.set_property_of(ff, property, value)?,
                None => system.set_property(property, value)?,
            };
        }
        Action::AddGroup { group } => {
            system.add_group(build_group(group, catalogue)?)?;
        }
        Action::RemoveGroup { groups } => {
            system.remove_group(&group_id(groups))?;
        }
        Action::AddForcefield { forcefield } => {
            add_forcefield(system, forcefield, catalogue)?;
        }
        Action::RemoveForcefield { name } => {
            system.remove_forcefield(name)?;
        }
        Action::Rename { name } => {
            system.set_name(name.as_str())?;
        }
        Action::ApplyConstraints => {
            system.apply_constraints()?;
        }
        Action::CollectStats => {
            system.collect_stats()?;
        }
    }
    Ok(())
}
