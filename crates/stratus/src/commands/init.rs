use colored::Colorize;
use std::path::Path;

const DEMO_TEMPLATE: &str = r#"// Stratus デモスタック
// stratus plan で変更内容を確認し、stratus apply --yes で適用します。
stack "demo"

parameter "cidr" default="10.0.0.0/16"

resource "vpc" type="network" {
    name "demo-net"
    cidr (param)"cidr"
}

resource "subnet-a" type="subnet" {
    name "demo-subnet-a"
    network (attr)"vpc.id"
    zone (sys)"region"
}

resource "api" type="endpoint" {
    name "demo-api"
    network (attr)"vpc.id"
    service "api"
}

resource "zone" type="dns-zone" {
    name "demo.internal"
}

// エンドポイントの dns-entry は "ゾーンID:DNS名" の複合値
resource "api-alias" type="dns-record" {
    name "api"
    zone (attr)"zone.id"
    value {
        select index=1 {
            split on=":" { value (attr)"api.dns-entry" }
        }
    }
}

output "network-id" description="作成されたネットワークのID" (attr)"vpc.id"
output "api-fqdn" description="APIエイリアスのFQDN" (attr)"api-alias.fqdn"
"#;

pub async fn handle() -> anyhow::Result<()> {
    let path = Path::new("stratus.kdl");

    if path.exists() {
        eprintln!("{}", "✗ stratus.kdl は既に存在します".red().bold());
        eprintln!("  既存のテンプレートを上書きしません");
        std::process::exit(1);
    }

    std::fs::write(path, DEMO_TEMPLATE)?;

    println!("{}", "✓ stratus.kdl を作成しました".green().bold());
    println!();
    println!("次のステップ:");
    println!("  {} で変更内容を確認", "stratus plan".cyan());
    println!("  {} で適用", "stratus apply --yes".cyan());

    Ok(())
}
