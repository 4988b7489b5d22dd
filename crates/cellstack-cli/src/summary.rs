use cellstack_core::stack::{ChannelSource, MetaStack};
use cellstack_core::ImageStack;
use console::Style;

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    kind: Style,
    computed: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            kind: Style::new().green(),
            computed: Style::new().dim().yellow(),
        }
    }
}

pub fn print_composition_summary(meta: &MetaStack) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("Composite Stack"));
    println!("  {}", s.title.apply_to("\u{2550}".repeat(15)));
    println!();

    println!(
        "  {:<14}{}",
        s.label.apply_to("Stacks"),
        s.value.apply_to(meta.stack_names().join(", "))
    );
    match meta.geometry() {
        Some(g) => {
            println!(
                "  {:<14}{}",
                s.label.apply_to("Dimensions"),
                s.value.apply_to(format!("{}x{}", g.width, g.height))
            );
            println!("  {:<14}{}", s.label.apply_to("Frames"), s.value.apply_to(g.n_frames));
        }
        None => println!("  {:<14}{}", s.label.apply_to("Dimensions"), s.computed.apply_to("not set")),
    }
    println!();

    println!("  {}", s.header.apply_to(format!("Channels ({})", meta.n_channels())));
    for (i, channel) in meta.channels().iter().enumerate() {
        let source = match &channel.source {
            ChannelSource::Real { stack, channel } => format!("{stack}[{channel}]"),
            ChannelSource::Computed { .. } => "computed".to_string(),
        };
        println!(
            "    {:<4}{:<20}{:<16}{}",
            s.label.apply_to(i),
            s.value.apply_to(&channel.label),
            s.kind.apply_to(channel.kind),
            s.computed.apply_to(source)
        );
    }
    println!();
}
