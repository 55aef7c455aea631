use console::Style;
use borealis_core::pipeline::config::PipelineConfig;

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    disabled: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            disabled: Style::new().dim().yellow(),
            path: Style::new().underlined(),
        }
    }
}

pub fn print_pipeline_summary(config: &PipelineConfig) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("Borealis Pipeline"));
    println!("  {}", s.title.apply_to("\u{2550}".repeat(17)));
    println!();

    println!("  {:<14}{}", s.label.apply_to("Name"), s.value.apply_to(&config.name));
    println!(
        "  {:<14}{}",
        s.label.apply_to("Version"),
        s.value.apply_to(&config.version)
    );
    if let Some(target) = &config.target {
        println!("  {:<14}{}", s.label.apply_to("Target"), s.value.apply_to(target));
    }
    if let Some(coronagraph) = &config.coronagraph {
        println!(
            "  {:<14}{}",
            s.label.apply_to("Coronagraph"),
            s.value.apply_to(format!("IWA {} mas", coronagraph.iwa))
        );
    }
    if let Some(satspots) = &config.satspots {
        println!(
            "  {:<14}{}",
            s.label.apply_to("Satspots"),
            s.value
                .apply_to(format!("r={} lam/D, amp={} nm", satspots.radius, satspots.amp))
        );
    }
    println!();

    match &config.calibrate {
        Some(options) => {
            println!("  {}", s.header.apply_to("Calibrate"));
            if let Some(dir) = &options.output_directory {
                println!(
                    "    {:<12}{}",
                    s.label.apply_to("Output"),
                    s.path.apply_to(dir.display())
                );
            }
            println!(
                "    {:<12}{}",
                s.label.apply_to("Bad pixels"),
                s.value.apply_to(if options.fix_bad_pixels { "fix" } else { "keep" })
            );
        }
        None => disabled_line(&s, "Calibrate"),
    }

    match &config.frame_select {
        Some(options) => {
            println!("  {}", s.header.apply_to("Frame Selection"));
            println!(
                "    {:<12}{}",
                s.label.apply_to("Metric"),
                s.method.apply_to(options.metric)
            );
            println!(
                "    {:<12}{}",
                s.label.apply_to("Cutoff"),
                s.value.apply_to(format!("{:.0}%", options.cutoff * 100.0))
            );
        }
        None => disabled_line(&s, "Frame Selection"),
    }

    match &config.register {
        Some(options) => {
            println!("  {}", s.header.apply_to("Registration"));
            println!(
                "    {:<12}{}",
                s.label.apply_to("Method"),
                s.method.apply_to(options.method)
            );
            println!(
                "    {:<12}{}",
                s.label.apply_to("Window"),
                s.value.apply_to(format!("{} px", options.window_size))
            );
        }
        None => disabled_line(&s, "Registration"),
    }

    match &config.collapse {
        Some(options) => {
            println!("  {}", s.header.apply_to("Collapse"));
            println!(
                "    {:<12}{}",
                s.label.apply_to("Method"),
                s.method.apply_to(options.method)
            );
        }
        None => disabled_line(&s, "Collapse"),
    }

    match &config.polarimetry {
        Some(options) => {
            println!("  {}", s.header.apply_to("Polarimetry"));
            println!(
                "    {:<12}{}",
                s.label.apply_to("N per HWP"),
                s.value.apply_to(options.n_per_hwp)
            );
            match &options.ip {
                Some(ip) => println!(
                    "    {:<12}{}",
                    s.label.apply_to("IP"),
                    s.method.apply_to(ip.method)
                ),
                None => println!(
                    "    {:<12}{}",
                    s.label.apply_to("IP"),
                    s.disabled.apply_to("disabled")
                ),
            }
        }
        None => disabled_line(&s, "Polarimetry"),
    }

    match &config.products {
        Some(options) => {
            println!("  {}", s.header.apply_to("Products"));
            let mut kinds = Vec::new();
            if options.header_table {
                kinds.push("header table");
            }
            if options.adi_cubes {
                kinds.push("ADI cubes");
            }
            if options.pdi_cubes {
                kinds.push("PDI cubes");
            }
            println!(
                "    {:<12}{}",
                s.label.apply_to("Outputs"),
                s.value.apply_to(kinds.join(", "))
            );
        }
        None => disabled_line(&s, "Products"),
    }
    println!();
}

fn disabled_line(s: &Styles, name: &str) {
    println!(
        "  {:<16}{}",
        s.header.apply_to(name),
        s.disabled.apply_to("disabled")
    );
}
