use serde_json::json;
use sluice::{Args, Config, PackageSpec, ReloadScope, TaskSpec};

fn main() -> anyhow::Result<()> {
    let mut args = Args::new();
    args.insert("minify", true);

    let config = Config::new()
        .task(
            "styles",
            TaskSpec::new("assets/styles/*.scss")
                .watch("assets/styles/**/*.scss")
                .dest("public/css")
                .sync(ReloadScope::Files("*.css".into()))
                .pipes(|plugins, args| {
                    Ok(vec![Some(
                        plugins.stage("scss", json!({ "compressed": args.flag("minify") }))?,
                    )])
                }),
        )
        .task(
            "scripts",
            TaskSpec::new("assets/js/**/*.js")
                .dest("public/js")
                .do_one(true)
                .sync(ReloadScope::Page)
                .pipes(|plugins, args| {
                    Ok(vec![
                        args.str("banner")
                            .map(|text| plugins.stage("header", json!(format!("// {text}\n"))))
                            .transpose()?,
                        Some(plugins.stage("rename", json!({ "suffix": ".min" }))?),
                    ])
                }),
        )
        .package(PackageSpec {
            args,
            entry: "src/main.rs".into(),
            files: vec!["!src/**".into(), "!assets/**".into(), ".htaccess".into()],
            ..Default::default()
        });

    sluice::cli::run(config)
}
