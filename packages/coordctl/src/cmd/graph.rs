use anyhow::Result;
use colored::Colorize;
use coordinator::{standard_fleet, Config, DependencyGraph};

pub fn graph(config: &Config) -> Result<()> {
    let specs = standard_fleet();
    let graph = specs
        .iter()
        .fold(DependencyGraph::builder(), |builder, spec| {
            builder.waits_on(spec.name.clone(), spec.waits_on.iter().cloned())
        })
        .build()?;

    for name in graph.topological_order() {
        let Some(spec) = specs.iter().find(|s| &s.name == name) else {
            continue;
        };

        let enabled = spec
            .feature
            .as_deref()
            .map_or(true, |f| config.features.is_enabled(f));
        let marker = if enabled { "●".green() } else { "○".dimmed() };

        let mut details = vec![format!("every {}", humanize(spec.interval.as_secs()))];
        if let Some(delay) = spec.run_at_startup_after {
            details.push(format!("startup +{}", humanize(delay.as_secs())));
        }
        if let Some(tracker) = &spec.tracker {
            details.push(format!("tracked as {} ({})", tracker.name, tracker.format));
        }

        println!("{marker} {} {}", name.bold(), details.join(", ").dimmed());
        for dep in graph.dependencies(name) {
            println!("    waits on {}", dep.cyan());
        }
    }
    Ok(())
}

fn humanize(secs: u64) -> String {
    match secs {
        s if s % 86_400 == 0 => format!("{}d", s / 86_400),
        s if s % 3_600 == 0 => format!("{}h", s / 3_600),
        s if s % 60 == 0 => format!("{}m", s / 60),
        s => format!("{s}s"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_humanize() {
        assert_eq!(humanize(45), "45s");
        assert_eq!(humanize(30 * 60), "30m");
        assert_eq!(humanize(6 * 3_600), "6h");
        assert_eq!(humanize(6 * 86_400), "6d");
    }
}
