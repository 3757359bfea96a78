//! Recipe catalog schema and operations

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};

use crate::models::{GameTime, RecipeDef};

/// A recipe stored in the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRecipe {
    pub id: i64,
    pub recipe: RecipeDef,
}

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- One row per machine recipe, already overclocked
        CREATE TABLE IF NOT EXISTS recipes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            duration_s REAL NOT NULL,
            energy_per_tick REAL NOT NULL
        );

        -- Per-cycle quantities consumed
        CREATE TABLE IF NOT EXISTS recipe_inputs (
            recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
            item TEXT NOT NULL,
            quantity REAL NOT NULL,
            PRIMARY KEY (recipe_id, item)
        );

        -- Per-cycle quantities produced
        CREATE TABLE IF NOT EXISTS recipe_outputs (
            recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
            item TEXT NOT NULL,
            quantity REAL NOT NULL,
            PRIMARY KEY (recipe_id, item)
        );

        CREATE INDEX IF NOT EXISTS idx_recipe_outputs_item ON recipe_outputs(item);
        CREATE INDEX IF NOT EXISTS idx_recipe_inputs_item ON recipe_inputs(item);
        "#,
    )?;
    Ok(())
}

/// Insert a recipe with its inputs and outputs, returning its id
pub fn insert_recipe(conn: &Connection, recipe: &RecipeDef) -> Result<i64> {
    conn.execute(
        "INSERT INTO recipes (name, duration_s, energy_per_tick) VALUES (?1, ?2, ?3)",
        (&recipe.name, recipe.duration.as_seconds(), recipe.energy_per_tick),
    )
    .with_context(|| format!("inserting recipe '{}'", recipe.name))?;
    let id = conn.last_insert_rowid();

    for (item, quantity) in &recipe.inputs {
        conn.execute(
            "INSERT INTO recipe_inputs (recipe_id, item, quantity) VALUES (?1, ?2, ?3)",
            (id, item, quantity),
        )?;
    }
    for (item, quantity) in &recipe.outputs {
        conn.execute(
            "INSERT INTO recipe_outputs (recipe_id, item, quantity) VALUES (?1, ?2, ?3)",
            (id, item, quantity),
        )?;
    }
    Ok(id)
}

/// Insert many recipes in one transaction
pub fn insert_recipes(conn: &mut Connection, recipes: &[RecipeDef]) -> Result<Vec<i64>> {
    let tx = conn.transaction()?;
    let mut ids = Vec::with_capacity(recipes.len());
    for recipe in recipes {
        ids.push(insert_recipe(&tx, recipe)?);
    }
    tx.commit()?;
    Ok(ids)
}

/// Remove every recipe from the catalog
pub fn clear_recipes(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DELETE FROM recipe_outputs;
        DELETE FROM recipe_inputs;
        DELETE FROM recipes;
        "#,
    )?;
    Ok(())
}

fn quantities(conn: &Connection, table: &str, recipe_id: i64) -> Result<BTreeMap<String, f64>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT item, quantity FROM {table} WHERE recipe_id = ?1 ORDER BY item"
    ))?;
    let rows = stmt.query_map([recipe_id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)))?;

    let mut results = BTreeMap::new();
    for row in rows {
        let (item, quantity) = row?;
        results.insert(item, quantity);
    }
    Ok(results)
}

fn hydrate(conn: &Connection, id: i64, name: String, duration_s: f64, energy_per_tick: f64) -> Result<CatalogRecipe> {
    let mut recipe = RecipeDef::new(name, GameTime::from_seconds(duration_s), energy_per_tick);
    recipe.inputs = quantities(conn, "recipe_inputs", id)?;
    recipe.outputs = quantities(conn, "recipe_outputs", id)?;
    Ok(CatalogRecipe { id, recipe })
}

/// List all recipes in insertion order
pub fn list_recipes(conn: &Connection) -> Result<Vec<CatalogRecipe>> {
    let mut stmt = conn.prepare("SELECT id, name, duration_s, energy_per_tick FROM recipes ORDER BY id")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, f64>(2)?,
            row.get::<_, f64>(3)?,
        ))
    })?;

    let mut results = Vec::new();
    for row in rows {
        let (id, name, duration_s, energy_per_tick) = row?;
        results.push(hydrate(conn, id, name, duration_s, energy_per_tick)?);
    }
    Ok(results)
}

/// Recipes ready to balance, in insertion order
pub fn load_recipes(conn: &Connection) -> Result<Vec<RecipeDef>> {
    Ok(list_recipes(conn)?.into_iter().map(|c| c.recipe).collect())
}

/// Get a single recipe by id
pub fn get_recipe(conn: &Connection, id: i64) -> Result<Option<CatalogRecipe>> {
    let header = conn
        .query_row(
            "SELECT name, duration_s, energy_per_tick FROM recipes WHERE id = ?1",
            [id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?, row.get::<_, f64>(2)?)),
        )
        .optional()?;

    match header {
        Some((name, duration_s, energy_per_tick)) => Ok(Some(hydrate(conn, id, name, duration_s, energy_per_tick)?)),
        None => Ok(None),
    }
}

/// Get all recipes that produce a given item, with the per-cycle quantity
pub fn get_producers(conn: &Connection, item: &str) -> Result<Vec<(CatalogRecipe, f64)>> {
    let mut stmt = conn.prepare(
        "SELECT r.id, r.name, r.duration_s, r.energy_per_tick, ro.quantity
         FROM recipes r
         JOIN recipe_outputs ro ON r.id = ro.recipe_id
         WHERE ro.item = ?1
         ORDER BY r.id",
    )?;
    let rows = stmt.query_map([item], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, f64>(2)?,
            row.get::<_, f64>(3)?,
            row.get::<_, f64>(4)?,
        ))
    })?;

    let mut results = Vec::new();
    for row in rows {
        let (id, name, duration_s, energy_per_tick, quantity) = row?;
        results.push((hydrate(conn, id, name, duration_s, energy_per_tick)?, quantity));
    }
    Ok(results)
}

/// List all unique items some recipe produces
pub fn list_items(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT DISTINCT item FROM recipe_outputs ORDER BY item")?;

    let rows = stmt.query_map([], |row| row.get(0))?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}
