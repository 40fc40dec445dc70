use std::error::Error;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chain::{ChainStep, ChainTemplate, DocumentRef, ResultStore, TemplateStore, Visibility};
use ocr_providers::builtin_registry;
use ocr_workflow::{build_coordinator, EngineConfig, ExportTransformer, JobCoordinator};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Extensiones que se consideran documentos al lanzar un job sobre un
/// directorio. Los `.txt` junto a las imágenes son textos sidecar.
const DOCUMENT_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff", "bmp", "webp", "gif", "pdf"];

/// Formato de archivo para cargar plantillas.
#[derive(Debug, Deserialize)]
struct TemplateFile {
    name: String,
    owner: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    visibility: Visibility,
    steps: Vec<ChainStep>,
}

/// Menú interactivo para administrar plantillas y jobs de cadenas OCR.
///
/// Opciones soportadas:
/// 1) Cargar plantilla desde JSON
/// 2) Listar plantillas
/// 3) Lanzar job sobre un directorio
/// 4) Ver progreso de jobs
/// 5) Exportar job
/// 6) Cancelar job
/// 7) Listar proveedores
/// 8) Salir
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
                             .init();

    // Configuración y store (aplica migraciones embebidas)
    let config = EngineConfig::from_env()?;
    let store = Arc::new(ocr_persistence::new_from_env()?);
    let registry = Arc::new(builtin_registry());
    let templates: Arc<dyn TemplateStore> = store.clone();
    let results: Arc<dyn ResultStore> = store.clone();
    let coordinator = build_coordinator(templates.clone(), results.clone(), registry.clone(), &config);
    let exporter = ExportTransformer::new(results.clone());

    // Jobs que quedaron a medias en una ejecución anterior
    match coordinator.recover().await {
        Ok(resumed) if !resumed.is_empty() => println!("Jobs reanudados: {}", resumed.len()),
        Ok(_) => {}
        Err(e) => eprintln!("Error reanudando jobs: {}", e),
    }

    loop {
        println!("\n== OCR chain menu ==");
        println!("1) Cargar plantilla desde JSON");
        println!("2) Listar plantillas");
        println!("3) Lanzar job sobre un directorio");
        println!("4) Ver progreso de jobs");
        println!("5) Exportar job");
        println!("6) Cancelar job");
        println!("7) Listar proveedores");
        println!("8) Salir");
        print!("Elige una opción: ");
        io::stdout().flush().ok();

        let mut choice = String::new();
        if io::stdin().read_line(&mut choice)? == 0 {
            break;
        }
        match choice.trim() {
            "1" => {
                let path = prompt("Ruta del JSON de plantilla: ")?;
                match load_template(Path::new(path.trim())) {
                    Ok(t) => match templates.create_template(t) {
                        Ok(t) => println!("Plantilla creada: {} ('{}', {} pasos)", t.id, t.name, t.steps.len()),
                        Err(e) => eprintln!("Error guardando plantilla: {}", e),
                    },
                    Err(e) => eprintln!("Plantilla inválida: {}", e),
                }
            }
            "2" => match templates.list_templates(None) {
                Ok(list) => {
                    println!("\nID                                   | VER | OWNER        | NAME");
                    println!("-----------------------------------------------------------------------------------");
                    for t in list {
                        println!("{} | {:>3} | {:<12} | {}", t.id, t.version, t.owner, t.name);
                        for s in &t.steps {
                            let state = if s.enabled { "" } else { " (deshabilitado)" };
                            println!("    {}. {} <- {}{}", s.step_number, s.provider, s.input_source, state);
                        }
                    }
                }
                Err(e) => eprintln!("Error listando plantillas: {}", e),
            },
            "3" => {
                let id_s = prompt("Plantilla (UUID): ")?;
                let template_id = match Uuid::parse_str(id_s.trim()) {
                    Ok(u) => u,
                    Err(_) => { eprintln!("UUID inválido"); continue; }
                };
                let dir = prompt("Directorio de documentos: ")?;
                let documents = match documents_in_dir(Path::new(dir.trim())) {
                    Ok(d) => d,
                    Err(e) => { eprintln!("No se pudo leer el directorio: {}", e); continue; }
                };
                match coordinator.launch(&template_id, documents).await {
                    Ok(job_id) => println!("Job lanzado: {}", job_id),
                    Err(e) => eprintln!("Error lanzando job: {}", e),
                }
            }
            "4" => show_jobs(&coordinator),
            "5" => {
                let id_s = prompt("Job a exportar (UUID): ")?;
                let job_id = match Uuid::parse_str(id_s.trim()) {
                    Ok(u) => u,
                    Err(_) => { eprintln!("UUID inválido"); continue; }
                };
                match exporter.export(&job_id).and_then(|b| b.write_to_dir(&config.export_dir)) {
                    Ok(dir) => println!("Exportado en {}", dir.display()),
                    Err(e) => eprintln!("Error exportando: {}", e),
                }
            }
            "6" => {
                let id_s = prompt("Job a cancelar (UUID): ")?;
                let job_id = match Uuid::parse_str(id_s.trim()) {
                    Ok(u) => u,
                    Err(_) => { eprintln!("UUID inválido"); continue; }
                };
                match coordinator.cancel(&job_id) {
                    Ok(true) => println!("Cancelación solicitada"),
                    Ok(false) => println!("El job ya no está en curso"),
                    Err(e) => eprintln!("Error cancelando: {}", e),
                }
            }
            "7" => {
                for p in registry.describe() {
                    let caps: Vec<String> = p.capabilities.iter().map(|c| c.to_string()).collect();
                    let state = if p.available { "disponible" } else { "no disponible" };
                    println!("{:<14} {:<24} {}", p.name, caps.join(","), state);
                }
            }
            "8" | "q" | "quit" => break,
            other => println!("Opción desconocida: {}", other),
        }
    }

    Ok(())
}

fn prompt(msg: &str) -> Result<String, Box<dyn Error>> {
    print!("{}", msg);
    io::stdout().flush()?;
    let mut s = String::new();
    io::stdin().read_line(&mut s)?;
    Ok(s)
}

fn load_template(path: &Path) -> Result<ChainTemplate, Box<dyn Error>> {
    let raw = std::fs::read_to_string(path)?;
    let file: TemplateFile = serde_json::from_str(&raw)?;
    let mut template = ChainTemplate::new(file.name, file.owner, file.steps)?.with_visibility(file.visibility);
    if let Some(d) = file.description {
        template = template.with_description(d);
    }
    Ok(template)
}

/// Documentos del directorio (no recursivo), ordenados por nombre.
fn documents_in_dir(dir: &Path) -> io::Result<Vec<DocumentRef>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
             .and_then(|e| e.to_str())
             .map(|e| DOCUMENT_EXTENSIONS.contains(&e.to_lowercase().as_str()))
             .unwrap_or(false)
        })
        .collect();
    paths.sort();
    Ok(paths.iter().filter_map(DocumentRef::from_path).collect())
}

fn show_jobs(coordinator: &JobCoordinator) {
    match coordinator.list_jobs() {
        Ok(jobs) => {
            println!("\nJOB                                  | STATUS                | DONE      | FAILED | %");
            println!("-----------------------------------------------------------------------------------");
            for j in jobs {
                println!("{} | {:<21} | {:>4}/{:<4} | {:>6} | {:.0}",
                         j.job_id, j.status.as_str(), j.processed, j.total, j.failed, j.percent);
            }
        }
        Err(e) => eprintln!("Error listando jobs: {}", e),
    }
}
