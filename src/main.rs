use std::env;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use log::{info, warn};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use osm_search::config::{SavedSearches, SearchSetting};
use osm_search::dataset::MemberRecord;
use osm_search::{DataSet, LatLon, MatchRegistry, ParseError, PrimitiveKind, SearchFlags};

const SAVED_SEARCHES_FILE: &str = "saved_searches.json";

/// 交互会话状态
struct Session {
    data_set: DataSet,
    registry: MatchRegistry,
    flags: SearchFlags,
    saved: SavedSearches,
    last: Option<SearchSetting>,
}

impl Session {
    fn new(data_set: DataSet) -> Self {
        let registry = MatchRegistry::with_builtins(Arc::new(data_set.bounds()));
        let saved = match SavedSearches::from_json_file(SAVED_SEARCHES_FILE) {
            Ok(saved) => {
                println!("✅ 加载了 {} 条已保存的搜索", saved.len());
                saved
            }
            Err(e) => {
                info!("no saved searches loaded: {e}");
                SavedSearches::default()
            }
        };
        Self {
            data_set,
            registry,
            flags: SearchFlags::default(),
            saved,
            last: None,
        }
    }

    /// 处理一行输入；返回 false 表示退出
    fn handle(&mut self, line: &str) -> bool {
        match line {
            ":quit" | ":q" => return false,
            ":help" | ":h" => print_help(),
            ":case" => {
                self.flags.case_sensitive = !self.flags.case_sensitive;
                println!("区分大小写: {}", on_off(self.flags.case_sensitive));
            }
            ":regex" => {
                self.flags.regex_search = !self.flags.regex_search;
                println!("正则搜索: {}", on_off(self.flags.regex_search));
            }
            ":keywords" => println!("{}", self.registry.keywords().join(" ")),
            ":save" => self.save_last(),
            ":saved" => {
                if self.saved.is_empty() {
                    println!("(没有已保存的搜索)");
                }
                for (i, setting) in self.saved.iter().enumerate() {
                    println!(
                        "  {}. {}  [大小写:{} 正则:{}]",
                        i + 1,
                        setting.text,
                        on_off(setting.case_sensitive),
                        on_off(setting.regex_search)
                    );
                }
            }
            command if command.starts_with(':') => {
                println!("✗ 未知命令: {command}，输入 :help 查看帮助");
            }
            query => self.search(query),
        }
        true
    }

    fn search(&mut self, query: &str) {
        let start = Instant::now();
        let setting = SearchSetting::new(query, self.flags);
        match setting.compile(&self.registry) {
            Ok(compiled) => {
                println!("表达式: {compiled}");
                let mut count = 0;
                for primitive in self.data_set.search(&compiled) {
                    println!("  {primitive}");
                    count += 1;
                }
                println!("✓ {count} 个匹配，用时 {:?}", start.elapsed());
                self.last = Some(setting);
            }
            Err(e) => print_parse_error(query, &e),
        }
    }

    fn save_last(&mut self) {
        let Some(setting) = self.last.clone() else {
            println!("⚠️ 还没有成功执行过搜索");
            return;
        };
        self.saved.remember(setting);
        match self.saved.save(SAVED_SEARCHES_FILE) {
            Ok(()) => println!("✅ 已保存到 {SAVED_SEARCHES_FILE}"),
            Err(e) => println!("❌ 保存失败: {e}"),
        }
    }
}

fn on_off(value: bool) -> &'static str {
    if value {
        "开"
    } else {
        "关"
    }
}

fn print_parse_error(query: &str, error: &ParseError) {
    println!("✗ 解析失败: {error}");
    if let Some(span) = error.span {
        println!("  {query}");
        let offset = query.get(..span.start).map_or(0, |s| s.chars().count());
        let width = query
            .get(span.start..span.end)
            .map_or(1, |s| s.chars().count().max(1));
        println!("  {}{}", " ".repeat(offset), "^".repeat(width));
        println!("  位置 {}-{}", span.start, span.end);
    }
    if let Some(cause) = &error.cause {
        println!("  原因: {cause}");
    }
}

fn print_help() {
    println!("输入搜索表达式，例如:");
    println!("  type:way highway=residential");
    println!("  name:main or -building=*");
    println!("  child (type:relation type=multipolygon)");
    println!("命令:");
    println!("  :case      切换区分大小写");
    println!("  :regex     切换正则搜索");
    println!("  :keywords  列出所有关键字");
    println!("  :save      保存上一条搜索");
    println!("  :saved     列出已保存的搜索");
    println!("  :quit      退出");
}

/// 未指定数据集文件时使用的示例数据
fn demo_data_set() -> DataSet {
    let mut ds = DataSet::new();
    ds.add_node(1, LatLon::new(48.2080, 16.3710));
    ds.add_node(2, LatLon::new(48.2085, 16.3725));
    ds.add_node(3, LatLon::new(48.2092, 16.3718));
    let cafe = ds.add_node(4, LatLon::new(48.2086, 16.3716));
    ds.put_tag(cafe, "amenity", "cafe");
    ds.put_tag(cafe, "name", "Café Central");

    let street = ds.add_way(10, &[1, 2]);
    ds.put_tag(street, "highway", "residential");
    ds.put_tag(street, "name", "Main Street");

    let park = ds.add_way(11, &[1, 2, 3, 1]);
    ds.put_tag(park, "leisure", "park");

    let route = ds.add_relation(20, vec![MemberRecord::new(PrimitiveKind::Way, 10, "forward")]);
    ds.put_tag(route, "type", "route");
    ds.put_tag(route, "route", "bus");
    ds
}

fn main() -> Result<()> {
    env_logger::init();

    println!("--- OSM 搜索表达式编译器 ---");

    let data_set = match env::args().nth(1) {
        Some(path) => {
            let data_set = DataSet::from_json_file(&path)
                .with_context(|| format!("无法加载数据集 {path}"))?;
            println!("✅ 使用数据集文件: {path}");
            data_set
        }
        None => {
            warn!("no data set file given, using the demo data set");
            println!("⚠️ 未指定数据集文件，使用内置示例数据");
            demo_data_set()
        }
    };
    println!("✅ 数据集包含 {} 个对象，输入 :help 查看帮助\n", data_set.len());

    let mut session = Session::new(data_set);
    let mut editor = DefaultEditor::new().context("无法初始化行编辑器")?;

    loop {
        match editor.readline("search> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);
                if !session.handle(line) {
                    break;
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e).context("读取输入失败"),
        }
    }

    Ok(())
}
